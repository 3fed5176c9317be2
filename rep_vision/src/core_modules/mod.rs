pub mod angle;
pub mod clock;
pub mod form_evaluator;
pub mod history;
pub mod landmark;
pub mod rep_counter;
pub mod session_registry;
