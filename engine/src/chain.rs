//! Scanner chain runtime (L2).
//!
//! Scanners run sequentially: the output document of scanner *i* is the
//! input of scanner *i+1*. Views are carried across stages - a scanner that
//! returns a document without views gets the previous views re-attached.
//! Each stage is wrapped in a timeout, recorded as a metric, and checked
//! against the fail-fast threshold.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use schnabel_types::{AuditError, Finding, FindingKind, NormalizedInput, RiskLevel};

use schnabel_scanners::Scanner;

use crate::views::ensure_views;

/// Default per-scanner time budget.
const DEFAULT_SCANNER_TIMEOUT: Duration = Duration::from_secs(30);

/// One per-scanner execution record, in chain order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanMetric {
    pub scanner: String,
    pub kind: FindingKind,
    pub duration_ms: u64,
    pub finding_count: usize,
}

/// Synchronous per-metric callback, invoked in submission order.
pub type MetricCallback = dyn Fn(&ScanMetric) + Send + Sync;

/// Chain options.
#[derive(Clone)]
pub struct ScanOptions {
    /// Per-scanner timeout; a scanner's own `timeout()` overrides it.
    pub scanner_timeout: Duration,
    /// Stop the chain once a finding reaches this risk, when set.
    pub fail_fast_at: Option<RiskLevel>,
    pub on_metric: Option<Arc<MetricCallback>>,
}

impl Default for ScanOptions {
    fn default() -> Self {
        Self {
            scanner_timeout: DEFAULT_SCANNER_TIMEOUT,
            fail_fast_at: None,
            on_metric: None,
        }
    }
}

impl std::fmt::Debug for ScanOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScanOptions")
            .field("scanner_timeout", &self.scanner_timeout)
            .field("fail_fast_at", &self.fail_fast_at)
            .field("on_metric", &self.on_metric.as_ref().map(|_| "<callback>"))
            .finish()
    }
}

/// Result of a full chain run.
#[derive(Debug)]
pub struct ScanOutcome {
    pub input: NormalizedInput,
    pub findings: Vec<Finding>,
    pub metrics: Vec<ScanMetric>,
}

/// Run the chain over a working document.
///
/// Findings are ordered by (scanner index, emission order); metrics match
/// the executed prefix of the chain. Timeouts and scanner errors abort the
/// chain and discard partial results.
pub async fn scan(
    input: NormalizedInput,
    scanners: &[Box<dyn Scanner>],
    options: &ScanOptions,
) -> Result<ScanOutcome, AuditError> {
    let mut current = ensure_views(input);
    let mut findings: Vec<Finding> = Vec::new();
    let mut metrics: Vec<ScanMetric> = Vec::new();
    let mut seen_names: HashSet<&str> = HashSet::new();

    for (index, scanner) in scanners.iter().enumerate() {
        let name = scanner.name();
        if name.trim().is_empty() {
            return Err(AuditError::ScannerInvalid {
                scanner: format!("#{index}"),
                index,
                reason: "scanner has an empty name".to_string(),
            });
        }
        if !seen_names.insert(name) {
            return Err(AuditError::ScannerInvalid {
                scanner: name.to_string(),
                index,
                reason: "duplicate scanner name in chain".to_string(),
            });
        }

        let previous_views = current.views.clone();
        let raw_prompt_before = previous_views
            .as_ref()
            .map(|views| views.prompt.raw.clone());

        let budget = scanner.timeout().unwrap_or(options.scanner_timeout);
        let started = Instant::now();
        let output = match tokio::time::timeout(budget, scanner.run(&current)).await {
            Err(_) => {
                return Err(AuditError::ScannerTimeout {
                    scanner: name.to_string(),
                    index,
                    elapsed_ms: budget.as_millis() as u64,
                });
            }
            Ok(Err(err)) => {
                // Scanner-internal failures poison the whole chain.
                return Err(AuditError::Chain {
                    scanner: name.to_string(),
                    index,
                    reason: err.to_string(),
                });
            }
            Ok(Ok(output)) => output,
        };
        let duration_ms = started.elapsed().as_millis() as u64;

        let mut next = output.input;
        if next.views.is_none() {
            next.views = previous_views;
        }
        if let (Some(before), Some(views)) = (&raw_prompt_before, &next.views)
            && views.prompt.raw != *before
        {
            return Err(AuditError::ScannerInvalid {
                scanner: name.to_string(),
                index,
                reason: "scanner mutated the raw view".to_string(),
            });
        }

        let metric = ScanMetric {
            scanner: name.to_string(),
            kind: scanner.kind(),
            duration_ms,
            finding_count: output.findings.len(),
        };
        if let Some(callback) = &options.on_metric {
            callback(&metric);
        }
        metrics.push(metric);

        let stage_findings = output.findings;
        let tripped = options.fail_fast_at.is_some_and(|threshold| {
            stage_findings.iter().any(|finding| finding.risk >= threshold)
        });
        findings.extend(stage_findings);
        current = next;

        if tripped {
            tracing::debug!(scanner = name, index, "fail-fast threshold reached; stopping chain");
            break;
        }
    }

    Ok(ScanOutcome {
        input: current,
        findings,
        metrics,
    })
}

#[cfg(test)]
mod tests {
    use super::{ScanOptions, scan};
    use crate::normalize;
    use schnabel_scanners::{ScanFut, Scanner, ScannerOutput};
    use schnabel_types::{
        AuditRequest, Finding, FindingKind, FindingTarget, NormalizedInput, RiskLevel, ViewKind,
    };
    use std::sync::{Arc, Mutex, PoisonError};
    use std::time::Duration;

    struct EmitStage {
        name: &'static str,
        risk: RiskLevel,
    }

    impl Scanner for EmitStage {
        fn name(&self) -> &'static str {
            self.name
        }

        fn kind(&self) -> FindingKind {
            FindingKind::Detect
        }

        fn run<'a>(&'a self, input: &'a NormalizedInput) -> ScanFut<'a> {
            Box::pin(async move {
                let finding = Finding::new(
                    FindingKind::Detect,
                    self.name,
                    &input.request_id,
                    "k",
                    self.risk,
                    0.5,
                    "stage finding",
                    FindingTarget::prompt(ViewKind::Raw),
                );
                Ok(ScannerOutput {
                    input: input.clone(),
                    findings: vec![finding],
                })
            })
        }
    }

    struct ViewDropper;

    impl Scanner for ViewDropper {
        fn name(&self) -> &'static str {
            "view_dropper"
        }

        fn kind(&self) -> FindingKind {
            FindingKind::Sanitize
        }

        fn run<'a>(&'a self, input: &'a NormalizedInput) -> ScanFut<'a> {
            Box::pin(async move {
                let mut next = input.clone();
                next.views = None;
                Ok(ScannerOutput::unchanged(next))
            })
        }
    }

    struct SlowStage;

    impl Scanner for SlowStage {
        fn name(&self) -> &'static str {
            "slow_stage"
        }

        fn kind(&self) -> FindingKind {
            FindingKind::Detect
        }

        fn timeout(&self) -> Option<Duration> {
            Some(Duration::from_millis(20))
        }

        fn run<'a>(&'a self, input: &'a NormalizedInput) -> ScanFut<'a> {
            Box::pin(async move {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(ScannerOutput::unchanged(input.clone()))
            })
        }
    }

    fn doc() -> NormalizedInput {
        normalize(AuditRequest::new("req-chain", 0.0, "prompt"), None).expect("normalizes")
    }

    #[tokio::test]
    async fn metrics_match_findings_and_order() {
        let scanners: Vec<Box<dyn Scanner>> = vec![
            Box::new(EmitStage {
                name: "first",
                risk: RiskLevel::Low,
            }),
            Box::new(EmitStage {
                name: "second",
                risk: RiskLevel::Medium,
            }),
        ];
        let seen: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
        let seen_in_callback = seen.clone();
        let options = ScanOptions {
            on_metric: Some(Arc::new(move |metric| {
                seen_in_callback
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .push(metric.scanner.clone());
            })),
            ..Default::default()
        };

        let outcome = scan(doc(), &scanners, &options).await.expect("runs");
        assert_eq!(outcome.metrics.len(), 2);
        assert_eq!(outcome.findings.len(), 2);
        let total: usize = outcome.metrics.iter().map(|m| m.finding_count).sum();
        assert_eq!(total, outcome.findings.len());
        assert_eq!(outcome.findings[0].scanner, "first");
        assert_eq!(
            *seen.lock().unwrap_or_else(PoisonError::into_inner),
            vec!["first", "second"]
        );
    }

    #[tokio::test]
    async fn fail_fast_stops_the_chain() {
        let scanners: Vec<Box<dyn Scanner>> = vec![
            Box::new(EmitStage {
                name: "first",
                risk: RiskLevel::High,
            }),
            Box::new(EmitStage {
                name: "second",
                risk: RiskLevel::Low,
            }),
        ];
        let options = ScanOptions {
            fail_fast_at: Some(RiskLevel::High),
            ..Default::default()
        };
        let outcome = scan(doc(), &scanners, &options).await.expect("runs");
        assert_eq!(outcome.metrics.len(), 1);
        assert_eq!(outcome.findings.len(), 1);
    }

    #[tokio::test]
    async fn dropped_views_are_reattached() {
        let scanners: Vec<Box<dyn Scanner>> = vec![Box::new(ViewDropper)];
        let outcome = scan(doc(), &scanners, &ScanOptions::default())
            .await
            .expect("runs");
        let views = outcome.input.views.expect("views re-attached");
        assert_eq!(views.prompt.raw, "prompt");
    }

    #[tokio::test]
    async fn duplicate_scanner_names_fail_the_chain() {
        let scanners: Vec<Box<dyn Scanner>> = vec![
            Box::new(EmitStage {
                name: "twin",
                risk: RiskLevel::Low,
            }),
            Box::new(EmitStage {
                name: "twin",
                risk: RiskLevel::Low,
            }),
        ];
        let err = scan(doc(), &scanners, &ScanOptions::default())
            .await
            .expect_err("rejects duplicates");
        assert_eq!(err.kind(), "scanner_invalid");
        assert!(err.to_string().contains("twin"));
        assert!(err.to_string().contains("duplicate"));
    }

    #[tokio::test]
    async fn timeout_aborts_with_scanner_name() {
        let scanners: Vec<Box<dyn Scanner>> = vec![Box::new(SlowStage)];
        let err = scan(doc(), &scanners, &ScanOptions::default())
            .await
            .expect_err("times out");
        assert_eq!(err.kind(), "scanner_timeout");
        assert!(err.to_string().contains("slow_stage"));
    }
}
