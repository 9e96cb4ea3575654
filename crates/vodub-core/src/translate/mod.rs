//! Time-budgeted translation: budgets, prompts, retry-with-compression,
//! output hygiene, glossary and name handling.

pub mod budget;
pub mod clean;
pub mod glossary;
pub mod names;
pub mod prompt;
pub mod retry;
