pub mod hold;
pub mod portfolio;
pub mod prices;
pub mod render;
pub mod setup;
pub mod ui;
pub mod watch;
