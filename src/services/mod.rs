pub mod path_service;
pub mod settings;
