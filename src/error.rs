//! Error types for Paraflow
//!
//! Centralized error handling using thiserror. Only batch-level misuse is
//! reported through these; individual task failures live in `TaskResult`.

use thiserror::Error;

/// All error types that can be raised to a caller of Paraflow
#[derive(Debug, Error)]
pub enum ParaflowError {
    /// A task id was submitted twice within one batch
    #[error("Duplicate task id: {0}")]
    DuplicateTaskId(String),

    /// Executor or rate limiter configuration is unusable
    #[error("Invalid config: {0}")]
    InvalidConfig(String),

    /// Eager validation found a dependency cycle
    #[error("Dependency cycle among tasks: {}", .0.join(", "))]
    DependencyCycle(Vec<String>),

    /// Eager validation found a dependency on an id that was never submitted
    #[error("Task {task} depends on unknown task {dependency}")]
    UnknownDependency { task: String, dependency: String },

    /// Task plan file could not be turned into tasks
    #[error("Plan error: {0}")]
    Plan(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML deserialization error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

/// Result type alias for Paraflow operations
pub type Result<T> = std::result::Result<T, ParaflowError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_duplicate_task_id_error() {
        let err = ParaflowError::DuplicateTaskId("fetch".to_string());
        assert_eq!(err.to_string(), "Duplicate task id: fetch");
    }

    #[test]
    fn test_invalid_config_error() {
        let err = ParaflowError::InvalidConfig("max_concurrent_tasks must be at least 1".to_string());
        assert_eq!(err.to_string(), "Invalid config: max_concurrent_tasks must be at least 1");
    }

    #[test]
    fn test_dependency_cycle_error() {
        let err = ParaflowError::DependencyCycle(vec!["x".to_string(), "y".to_string()]);
        assert_eq!(err.to_string(), "Dependency cycle among tasks: x, y");
    }

    #[test]
    fn test_unknown_dependency_error() {
        let err = ParaflowError::UnknownDependency {
            task: "report".to_string(),
            dependency: "research".to_string(),
        };
        assert_eq!(err.to_string(), "Task report depends on unknown task research");
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: ParaflowError = io_err.into();
        assert!(matches!(err, ParaflowError::Io(_)));
        assert!(err.to_string().contains("file not found"));
    }

    #[test]
    fn test_json_error_conversion() {
        let json_err = serde_json::from_str::<serde_json::Value>("invalid").unwrap_err();
        let err: ParaflowError = json_err.into();
        assert!(matches!(err, ParaflowError::Json(_)));
    }

    #[test]
    fn test_yaml_error_conversion() {
        let yaml_err = serde_yaml::from_str::<Vec<String>>("{ not: a list").unwrap_err();
        let err: ParaflowError = yaml_err.into();
        assert!(matches!(err, ParaflowError::Yaml(_)));
    }

    #[test]
    fn test_result_type_alias() {
        fn returns_ok() -> Result<i32> {
            Ok(42)
        }

        fn returns_err() -> Result<i32> {
            Err(ParaflowError::InvalidConfig("test".to_string()))
        }

        assert!(returns_ok().is_ok());
        assert!(returns_err().is_err());
    }
}
