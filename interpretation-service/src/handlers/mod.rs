pub mod forms;
pub mod health;
pub mod interpretation;

pub use forms::{delete_form, delete_forms_batch, get_form, list_forms, update_form};
pub use health::{health_check, metrics, readiness};
pub use interpretation::{query_status, start_interpretation};
