mod connection;
mod repository;

pub use repository::StagingRepository;
