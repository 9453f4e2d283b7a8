pub mod history_types;
pub mod predict_types;
