pub mod actions;
pub mod campaigns;
pub mod events;
pub mod health;
pub mod rules;
