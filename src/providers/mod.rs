pub mod copilot;
pub mod copilot_auth;
pub mod copilot_models;
pub mod copilot_translate;
pub(crate) mod translator_contract;
