pub mod api;
pub mod db;
pub mod keys;
pub mod mongodb;
