//! Distributional comparison of two single-column samples.

use crate::core::{
    ConstraintCore, DataReference, ExecutionContext, Retrieval, Retrieve, Verdict,
};
use crate::db_access;
use crate::prelude::*;
use crate::security::InputValidator;
use async_trait::async_trait;
use tracing::{debug, warn};

/// Below this sample size the asymptotic p-value is not reported.
const MIN_SAMPLE_SIZE_FOR_P_VALUE: i64 = 35;

/// D statistic and both sample sizes.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct KsFactual {
    pub d_statistic: f64,
    pub n_samples: i64,
    pub m_samples: i64,
}

/// Two-sample Kolmogorov-Smirnov test.
///
/// The null hypothesis that both samples come from the same distribution is
/// rejected when the D statistic exceeds the critical value for the given
/// significance level. The asymptotic p-value is only reported in failure
/// messages.
#[derive(Debug)]
pub struct KolmogorovSmirnov2Sample {
    core: ConstraintCore<KsFactual, ()>,
    significance_level: f64,
}

impl KolmogorovSmirnov2Sample {
    pub fn new(core: ConstraintCore<KsFactual, ()>, significance_level: f64) -> Result<Self> {
        if core.ref2().is_none() {
            return Err(JudgeError::configuration(
                "KolmogorovSmirnov2Sample compares two samples and needs ref2.",
            ));
        }
        InputValidator::validate_fraction(significance_level, "significance_level")?;
        if significance_level == 0.0 {
            return Err(JudgeError::configuration("significance_level must be positive."));
        }
        Ok(Self {
            core,
            significance_level,
        })
    }

    /// Whether `d` stays below the critical value
    /// `c(a) * sqrt((n + m) / (n * m))` with `c(a) = sqrt(-ln(a / 2) / 2)`.
    pub fn accepts(d_statistic: f64, n_samples: i64, m_samples: i64, significance_level: f64) -> bool {
        let (n, m) = (n_samples as f64, m_samples as f64);
        let c_alpha = (-(significance_level / 2.0).ln() * 0.5).sqrt();
        d_statistic <= c_alpha * ((n + m) / (n * m)).sqrt()
    }

    /// Asymptotic p-value of the Kolmogorov distribution, `None` for samples
    /// smaller than 35.
    pub fn approximate_p_value(d_statistic: f64, n_samples: i64, m_samples: i64) -> Option<f64> {
        if n_samples.min(m_samples) < MIN_SAMPLE_SIZE_FOR_P_VALUE {
            return None;
        }
        let (n, m) = (n_samples as f64, m_samples as f64);
        let z = d_statistic * (n * m / (n + m)).sqrt();
        Some(kolmogorov_survival(z))
    }
}

/// `P(K > z)` for the Kolmogorov distribution.
fn kolmogorov_survival(z: f64) -> f64 {
    if z < 0.27 {
        return 1.0;
    }
    let p = if z < 1.18 {
        let x = (-std::f64::consts::PI.powi(2) / (8.0 * z * z)).exp();
        let cdf = (2.0 * std::f64::consts::PI).sqrt() / z
            * (x + x.powi(9) + x.powi(25) + x.powi(49));
        1.0 - cdf
    } else {
        let y = (-2.0 * z * z).exp();
        2.0 * (y - y.powi(4) + y.powi(9))
    };
    p.clamp(0.0, 1.0)
}

#[async_trait]
impl Retrieve for KolmogorovSmirnov2Sample {
    type Factual = KsFactual;
    type Target = ();

    fn kind(&self) -> &'static str {
        "KolmogorovSmirnov2Sample"
    }

    fn core(&self) -> &ConstraintCore<KsFactual, ()> {
        &self.core
    }

    async fn retrieve_factual(&self, ctx: &ExecutionContext, reference: &DataReference) -> Result<Retrieval<KsFactual>> {
        let ref2 = self
            .core
            .ref2()
            .ok_or_else(|| JudgeError::Internal("KolmogorovSmirnov2Sample without ref2".to_string()))?;
        let statistic = db_access::ks_2sample(ctx, reference, ref2).await?;
        let n_samples = db_access::row_count(ctx, reference, None).await?;
        let m_samples = db_access::row_count(ctx, ref2, None).await?;
        if n_samples.value.min(m_samples.value) < MIN_SAMPLE_SIZE_FOR_P_VALUE {
            warn!(
                n_samples = n_samples.value,
                m_samples = m_samples.value,
                "Sample too small for an accurate p-value approximation"
            );
        }
        let mut queries = statistic.queries;
        queries.extend(n_samples.queries);
        queries.extend(m_samples.queries);
        Ok(Retrieval::new(
            KsFactual {
                d_statistic: statistic.value,
                n_samples: n_samples.value,
                m_samples: m_samples.value,
            },
            queries,
        ))
    }

    async fn retrieve_target(&self, _ctx: &ExecutionContext, _reference: &DataReference) -> Result<Retrieval<()>> {
        Ok(Retrieval::literal(()))
    }
}

impl crate::core::Compare for KolmogorovSmirnov2Sample {
    fn compare(&self, factual: &KsFactual, _target: &()) -> Result<Verdict> {
        let KsFactual {
            d_statistic,
            n_samples,
            m_samples,
        } = *factual;
        if n_samples == 0 || m_samples == 0 {
            return Err(JudgeError::retrieval("Cannot compare an empty sample."));
        }
        let accepted = Self::accepts(d_statistic, n_samples, m_samples, self.significance_level);
        debug!(d_statistic, n_samples, m_samples, accepted, "Evaluated Kolmogorov-Smirnov test");
        Ok(Verdict::check(accepted, || {
            let mut message = format!(
                "Null hypothesis (H0) for the 2-sample Kolmogorov-Smirnov test was rejected, i.e., \
                 the two samples ({} and {}) do not originate from the same distribution. \
                 The test results are d={d_statistic}",
                self.core.reference,
                self.core.ref2().map(ToString::to_string).unwrap_or_default(),
            );
            if let Some(p_value) = Self::approximate_p_value(d_statistic, n_samples, m_samples) {
                message.push_str(&format!(" and p_value={p_value}"));
            }
            message.push('.');
            message
        }))
    }
}
