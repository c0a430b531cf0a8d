pub mod catalog_service;
pub mod object_source;
