//! Test doubles for the loop engine.
//!
//! - [`mocks`] - [`ScriptedGenerator`], a deterministic [`GenerationClient`](crate::llm::GenerationClient)

pub mod mocks;

pub use mocks::ScriptedGenerator;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{GenerationClient, GenerationRequest};

    #[tokio::test]
    async fn test_scripted_by_task_type() {
        let client = ScriptedGenerator::new()
            .with_response("testing", "run pytest")
            .with_default_response("fallback");

        let tested = client
            .generate(GenerationRequest::new("p").with_task_type("testing"))
            .await
            .unwrap();
        assert_eq!(tested.content, "run pytest");

        let other = client.generate(GenerationRequest::new("p")).await.unwrap();
        assert_eq!(other.content, "fallback");
        assert_eq!(client.call_count(), 2);
        assert_eq!(client.requests()[0].prompt, "p");
    }

    #[tokio::test]
    async fn test_fail_times_then_recover() {
        let client = ScriptedGenerator::new().fail_times(2, "model busy");

        for _ in 0..2 {
            let err = client.generate(GenerationRequest::new("p")).await.unwrap_err();
            assert_eq!(err.to_string(), "model busy");
        }
        assert!(client.generate(GenerationRequest::new("p")).await.is_ok());
        assert_eq!(client.call_count(), 3);
    }

    #[tokio::test]
    async fn test_availability_toggle() {
        let client = ScriptedGenerator::new().unavailable();
        assert!(!client.check_available().await);
        client.set_available(true);
        assert!(client.check_available().await);
    }
}
