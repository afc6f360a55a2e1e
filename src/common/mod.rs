pub mod config;
pub mod geojson;
pub mod scene;
