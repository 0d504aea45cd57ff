pub mod logging;
pub mod uri;
