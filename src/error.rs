use thiserror::Error;

#[derive(Debug, Error)]
pub enum TransformError {
    /// The dimension table carries the same user id more than once. A join
    /// against it would fan rows out and corrupt every downstream count, so
    /// the batch refuses to proceed.
    #[error("duplicate user_id {user_id:?} in teacher dimension table")]
    DuplicateTeacher { user_id: String },

    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
