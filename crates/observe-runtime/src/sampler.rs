//! Head sampler selection.

use crate::error::Result;
use observe_config::{SamplingConfig, SamplingMode};
use opentelemetry_sdk::trace::Sampler;

/// Builds the sampler for a sampling configuration.
///
/// `trace_id_ratio` respects an existing parent decision and applies the
/// ratio to root spans only.
///
/// # Errors
///
/// Returns a configuration error when `trace_id_ratio` is selected with an
/// argument outside `(0, 1]`.
pub fn build_sampler(config: &SamplingConfig) -> Result<Sampler> {
    let sampler = match config.mode {
        SamplingMode::AlwaysOn => Sampler::AlwaysOn,
        SamplingMode::AlwaysOff => Sampler::AlwaysOff,
        SamplingMode::ParentBasedAlwaysOn => Sampler::ParentBased(Box::new(Sampler::AlwaysOn)),
        SamplingMode::ParentBasedAlwaysOff => Sampler::ParentBased(Box::new(Sampler::AlwaysOff)),
        SamplingMode::TraceIdRatio => Sampler::ParentBased(Box::new(Sampler::TraceIdRatioBased(
            config.trace_id_ratio()?,
        ))),
    };
    Ok(sampler)
}

#[cfg(test)]
mod tests {
    use super::*;
    use opentelemetry::Context;
    use opentelemetry::trace::{
        SamplingDecision, SpanContext, SpanId, SpanKind, TraceContextExt, TraceFlags, TraceId,
        TraceState,
    };
    use opentelemetry_sdk::trace::ShouldSample;

    fn sampling(mode: SamplingMode, argument: f64) -> SamplingConfig {
        SamplingConfig { mode, argument }
    }

    #[test]
    fn test_simple_modes() {
        assert!(matches!(
            build_sampler(&sampling(SamplingMode::AlwaysOn, 1.0)).unwrap(),
            Sampler::AlwaysOn
        ));
        assert!(matches!(
            build_sampler(&sampling(SamplingMode::AlwaysOff, 1.0)).unwrap(),
            Sampler::AlwaysOff
        ));
    }

    fn decide(sampler: &Sampler, parent: Option<&Context>, trace_id: u128) -> SamplingDecision {
        sampler
            .should_sample(
                parent,
                TraceId::from_bytes(trace_id.to_be_bytes()),
                "work",
                &SpanKind::Internal,
                &[],
                &[],
            )
            .decision
    }

    fn sampled_parent() -> Context {
        Context::new().with_remote_span_context(SpanContext::new(
            TraceId::from_bytes(7u128.to_be_bytes()),
            SpanId::from_bytes([1; 8]),
            TraceFlags::SAMPLED,
            true,
            TraceState::default(),
        ))
    }

    #[test]
    fn test_parent_based_always_off_follows_parent() {
        let sampler = build_sampler(&sampling(SamplingMode::ParentBasedAlwaysOff, 1.0)).unwrap();

        assert_eq!(decide(&sampler, None, 1), SamplingDecision::Drop);
        assert_eq!(
            decide(&sampler, Some(&sampled_parent()), 1),
            SamplingDecision::RecordAndSample
        );
    }

    #[test]
    fn test_ratio_applies_to_roots_only() {
        let sampler = build_sampler(&sampling(SamplingMode::TraceIdRatio, 0.25)).unwrap();

        assert_eq!(decide(&sampler, None, 1), SamplingDecision::RecordAndSample);
        assert_eq!(decide(&sampler, None, u128::MAX), SamplingDecision::Drop);
        assert_eq!(
            decide(&sampler, Some(&sampled_parent()), u128::MAX),
            SamplingDecision::RecordAndSample
        );
    }

    #[test]
    fn test_zero_ratio_is_configuration_error() {
        let err = build_sampler(&sampling(SamplingMode::TraceIdRatio, 0.0)).unwrap_err();
        assert!(err.is_configuration());
    }

    #[test]
    fn test_ratio_above_one_is_configuration_error() {
        let err = build_sampler(&sampling(SamplingMode::TraceIdRatio, 1.01)).unwrap_err();
        assert!(err.is_configuration());
    }
}
