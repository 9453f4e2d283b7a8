pub mod history_cache;
pub mod history_view;
pub mod inference_client;
pub mod remote_store;
pub mod remote_sync;
pub mod request_controller;
pub mod thumbnail_service;
