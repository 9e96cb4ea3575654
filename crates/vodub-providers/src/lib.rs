//! Provider adapters: the object store, the ASR submit/poll client, the MT
//! chat-completion clients and the streaming TTS client.
//!
//! Credentials come from the environment and are checked by each adapter at
//! construction, never by the core.

pub mod asr;
pub mod object_store;
pub mod translate;
pub mod tts;

pub use asr::DoubaoAsrClient;
pub use object_store::TosObjectStore;
pub use translate::{build_translator, resolve_engine};
pub use tts::{AzureTtsClient, VolcTtsClient};
