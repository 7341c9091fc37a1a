use thiserror::Error;

#[derive(Debug, Error)]
pub enum CacheError {
    /// The batcher task has stopped and accepts no more operations.
    #[error("Batcher is closed")]
    Closed,
}

pub type CacheResult<T> = Result<T, CacheError>;
