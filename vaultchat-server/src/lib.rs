pub mod http;
pub mod maintenance;
pub mod ui;
pub mod upstream;
