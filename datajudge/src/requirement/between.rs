use super::{columns, ConstraintSettings, GainTolerance, Requirement};
use crate::constraints::{
    ColumnCheck, ColumnNames, ColumnType, DateExtremum, ExtremumCheck, KolmogorovSmirnov2Sample,
    MaxNullFraction, NRows, NRowsCheck, NUniques, NUniquesCheck, NumericExtremum, NumericMean,
    NumericPercentile, RowCheck, RowComparison, RowMatchingEquality, Uniques, UniquesCheck,
    UniquesOptions, VarCharLength,
};
use crate::core::{
    constant_tolerance, tolerance_getter, BoxedConstraint, Constraint, ConstraintCore,
    DataReference, DataSource, ExecutionContext, ToleranceGetter,
};
use crate::db_access::{self, MatchAndCompare};
use crate::prelude::*;
use futures::FutureExt;
use std::sync::Arc;
use tracing::debug;

/// Constraints comparing two data sources.
///
/// Optional date columns enable tolerances relative to the growth of the
/// covered date range, see [`BetweenRequirement::deviation_getter`].
#[derive(Debug)]
pub struct BetweenRequirement {
    data_source: DataSource,
    data_source2: DataSource,
    date_column: Option<String>,
    date_column2: Option<String>,
    constraints: Vec<BoxedConstraint>,
}

/// Inputs of the date growth rate between both sources.
#[derive(Debug)]
struct DateGrowth {
    reference: DataReference,
    reference2: DataReference,
    date_column: String,
    date_column2: String,
}

impl DateGrowth {
    async fn rate(&self, ctx: &ExecutionContext) -> Result<f64> {
        let growth = db_access::date_growth_rate(
            ctx,
            &self.reference,
            &self.reference2,
            &self.date_column,
            &self.date_column2,
        )
        .await?;
        debug!(growth_rate = growth.value, "Retrieved date growth rate");
        Ok(growth.value)
    }
}

impl BetweenRequirement {
    pub fn new(data_source: DataSource, data_source2: DataSource) -> Self {
        Self {
            data_source,
            data_source2,
            date_column: None,
            date_column2: None,
            constraints: Vec::new(),
        }
    }

    /// Date columns of both sources, used by date-range tolerances.
    pub fn with_date_columns(mut self, date_column: &str, date_column2: &str) -> Self {
        self.date_column = Some(date_column.to_string());
        self.date_column2 = Some(date_column2.to_string());
        self
    }

    pub fn from_tables(
        (db, schema, table): (&str, Option<&str>, &str),
        (db2, schema2, table2): (&str, Option<&str>, &str),
    ) -> Self {
        Self::new(
            DataSource::table(db, schema, table),
            DataSource::table(db2, schema2, table2),
        )
    }

    pub fn from_raw_queries(
        (query, name, declared): (&str, &str, Option<Vec<String>>),
        (query2, name2, declared2): (&str, &str, Option<Vec<String>>),
    ) -> Self {
        Self::new(
            DataSource::raw_query(query, name, declared),
            DataSource::raw_query(query2, name2, declared2),
        )
    }

    pub fn from_expressions((expression, name): (&str, &str), (expression2, name2): (&str, &str)) -> Self {
        Self::new(
            DataSource::expression(expression, name),
            DataSource::expression(expression2, name2),
        )
    }

    pub fn data_sources(&self) -> (&DataSource, &DataSource) {
        (&self.data_source, &self.data_source2)
    }

    /// Turns a [`GainTolerance`] into a getter evaluated at test time.
    ///
    /// A constant alone is returned as is. A deviation alone yields the date
    /// growth rate plus the deviation. Both yield the larger of the two.
    pub fn deviation_getter(&self, tolerance: GainTolerance) -> Result<ToleranceGetter> {
        tolerance.validate()?;
        let (constant, deviation) = match (tolerance.constant, tolerance.date_range_deviation) {
            (None, None) => {
                return Err(JudgeError::configuration("No valid gain/loss/deviation given."));
            }
            (Some(constant), None) => return Ok(constant_tolerance(constant)),
            (constant, Some(deviation)) => (constant, deviation),
        };
        let (Some(date_column), Some(date_column2)) = (&self.date_column, &self.date_column2) else {
            return Err(JudgeError::configuration(
                "Date growth can't be computed without date columns.",
            ));
        };
        let growth = Arc::new(DateGrowth {
            reference: DataReference::new(self.data_source.clone(), None, None),
            reference2: DataReference::new(self.data_source2.clone(), None, None),
            date_column: date_column.clone(),
            date_column2: date_column2.clone(),
        });
        Ok(tolerance_getter(move |ctx| {
            let growth = Arc::clone(&growth);
            async move {
                let tolerance = growth.rate(ctx).await? + deviation;
                Ok(constant.map_or(tolerance, |constant| constant.max(tolerance)))
            }
            .boxed()
        }))
    }

    fn push(&mut self, constraint: impl Constraint + 'static) -> &mut Self {
        debug!(constraint.description = %constraint.description(), "Added constraint");
        self.constraints.push(Box::new(constraint));
        self
    }

    fn references(
        &self,
        selected: Option<&[&str]>,
        selected2: Option<&[&str]>,
        settings: &ConstraintSettings,
    ) -> (DataReference, DataReference) {
        (
            settings.reference(&self.data_source, selected.map(columns)),
            settings.reference2(&self.data_source2, selected2.map(columns)),
        )
    }

    fn column_references(&self, column: &str, column2: &str, settings: &ConstraintSettings) -> (DataReference, DataReference) {
        (
            settings.reference(&self.data_source, Some(vec![column.to_string()])),
            settings.reference2(&self.data_source2, Some(vec![column2.to_string()])),
        )
    }

    fn core<F: Clone + Send, T: Clone + Send>(
        (reference, reference2): (DataReference, DataReference),
        settings: ConstraintSettings,
    ) -> ConstraintCore<F, T> {
        ConstraintCore::between(reference, reference2, settings.name, settings.cache_size)
    }

    fn add_n_rows(&mut self, check: NRowsCheck, settings: ConstraintSettings) -> Result<&mut Self> {
        let references = self.references(None, None, &settings);
        let constraint = NRows::new(check, Self::core(references, settings))?;
        Ok(self.push(constraint))
    }

    pub fn add_n_rows_equality_constraint(&mut self, settings: ConstraintSettings) -> Result<&mut Self> {
        self.add_n_rows(NRowsCheck::Equality, settings)
    }

    /// The relative gain in rows of the first source over the second must
    /// not exceed the tolerance.
    pub fn add_n_rows_max_gain_constraint(
        &mut self,
        tolerance: GainTolerance,
        settings: ConstraintSettings,
    ) -> Result<&mut Self> {
        let getter = self.deviation_getter(tolerance)?;
        self.add_n_rows(NRowsCheck::MaxGain(getter), settings)
    }

    /// The relative gain in rows must reach at least the tolerance.
    pub fn add_n_rows_min_gain_constraint(
        &mut self,
        tolerance: GainTolerance,
        settings: ConstraintSettings,
    ) -> Result<&mut Self> {
        let getter = self.deviation_getter(tolerance)?;
        self.add_n_rows(NRowsCheck::MinGain(getter), settings)
    }

    /// The relative loss in rows must not exceed the tolerance.
    pub fn add_n_rows_max_loss_constraint(
        &mut self,
        tolerance: GainTolerance,
        settings: ConstraintSettings,
    ) -> Result<&mut Self> {
        let getter = self.deviation_getter(tolerance)?;
        self.add_n_rows(NRowsCheck::MaxLoss(getter), settings)
    }

    fn add_n_uniques(
        &mut self,
        check: NUniquesCheck,
        selected: Option<&[&str]>,
        selected2: Option<&[&str]>,
        settings: ConstraintSettings,
    ) -> Result<&mut Self> {
        let references = self.references(selected, selected2, &settings);
        let constraint = NUniques::new(check, Self::core(references, settings))?;
        Ok(self.push(constraint))
    }

    pub fn add_n_uniques_equality_constraint(
        &mut self,
        selected: Option<&[&str]>,
        selected2: Option<&[&str]>,
        settings: ConstraintSettings,
    ) -> Result<&mut Self> {
        self.add_n_uniques(NUniquesCheck::Equality, selected, selected2, settings)
    }

    pub fn add_n_uniques_max_gain_constraint(
        &mut self,
        selected: Option<&[&str]>,
        selected2: Option<&[&str]>,
        tolerance: GainTolerance,
        settings: ConstraintSettings,
    ) -> Result<&mut Self> {
        let getter = self.deviation_getter(tolerance)?;
        self.add_n_uniques(NUniquesCheck::MaxGain(getter), selected, selected2, settings)
    }

    pub fn add_n_uniques_max_loss_constraint(
        &mut self,
        selected: Option<&[&str]>,
        selected2: Option<&[&str]>,
        tolerance: GainTolerance,
        settings: ConstraintSettings,
    ) -> Result<&mut Self> {
        let getter = self.deviation_getter(tolerance)?;
        self.add_n_uniques(NUniquesCheck::MaxLoss(getter), selected, selected2, settings)
    }

    /// The NULL fraction of `column` may exceed that of `column2` by at most
    /// `max_relative_deviation`, relative to the latter.
    pub fn add_max_null_fraction_constraint(
        &mut self,
        column: &str,
        column2: &str,
        max_relative_deviation: f64,
        settings: ConstraintSettings,
    ) -> Result<&mut Self> {
        let references = self.column_references(column, column2, &settings);
        let constraint = MaxNullFraction::new(Self::core(references, settings), max_relative_deviation)?;
        Ok(self.push(constraint))
    }

    pub fn add_numeric_min_constraint(&mut self, column: &str, column2: &str, settings: ConstraintSettings) -> Result<&mut Self> {
        let references = self.column_references(column, column2, &settings);
        let constraint = NumericExtremum::new(ExtremumCheck::Min, Self::core(references, settings));
        Ok(self.push(constraint))
    }

    pub fn add_numeric_max_constraint(&mut self, column: &str, column2: &str, settings: ConstraintSettings) -> Result<&mut Self> {
        let references = self.column_references(column, column2, &settings);
        let constraint = NumericExtremum::new(ExtremumCheck::Max, Self::core(references, settings));
        Ok(self.push(constraint))
    }

    pub fn add_numeric_mean_constraint(
        &mut self,
        column: &str,
        column2: &str,
        max_absolute_deviation: f64,
        settings: ConstraintSettings,
    ) -> Result<&mut Self> {
        let references = self.column_references(column, column2, &settings);
        let constraint = NumericMean::new(Self::core(references, settings), max_absolute_deviation)?;
        Ok(self.push(constraint))
    }

    pub fn add_numeric_percentile_constraint(
        &mut self,
        column: &str,
        column2: &str,
        percentage: f64,
        max_absolute_deviation: Option<f64>,
        max_relative_deviation: Option<f64>,
        settings: ConstraintSettings,
    ) -> Result<&mut Self> {
        let references = self.column_references(column, column2, &settings);
        let constraint = NumericPercentile::new(
            Self::core(references, settings),
            percentage,
            max_absolute_deviation,
            max_relative_deviation,
        )?;
        Ok(self.push(constraint))
    }

    fn add_uniques(
        &mut self,
        check: UniquesCheck,
        selected: &[&str],
        selected2: &[&str],
        options: UniquesOptions,
        settings: ConstraintSettings,
    ) -> Result<&mut Self> {
        let references = self.references(Some(selected), Some(selected2), &settings);
        let constraint = Uniques::new(check, Self::core(references, settings), options)?;
        Ok(self.push(constraint))
    }

    pub fn add_uniques_equality_constraint(
        &mut self,
        selected: &[&str],
        selected2: &[&str],
        options: UniquesOptions,
        settings: ConstraintSettings,
    ) -> Result<&mut Self> {
        self.add_uniques(UniquesCheck::Equality, selected, selected2, options, settings)
    }

    pub fn add_uniques_superset_constraint(
        &mut self,
        selected: &[&str],
        selected2: &[&str],
        options: UniquesOptions,
        settings: ConstraintSettings,
    ) -> Result<&mut Self> {
        self.add_uniques(UniquesCheck::Superset, selected, selected2, options, settings)
    }

    pub fn add_uniques_subset_constraint(
        &mut self,
        selected: &[&str],
        selected2: &[&str],
        options: UniquesOptions,
        settings: ConstraintSettings,
    ) -> Result<&mut Self> {
        self.add_uniques(UniquesCheck::Subset, selected, selected2, options, settings)
    }

    fn add_date_extremum(
        &mut self,
        check: ExtremumCheck,
        column: &str,
        column2: &str,
        use_bound_reference: bool,
        settings: ConstraintSettings,
    ) -> Result<&mut Self> {
        let references = self.column_references(column, column2, &settings);
        let constraint = DateExtremum::new(check, Self::core(references, settings), use_bound_reference);
        Ok(self.push(constraint))
    }

    pub fn add_date_min_constraint(
        &mut self,
        column: &str,
        column2: &str,
        use_lower_bound_reference: bool,
        settings: ConstraintSettings,
    ) -> Result<&mut Self> {
        self.add_date_extremum(ExtremumCheck::Min, column, column2, use_lower_bound_reference, settings)
    }

    pub fn add_date_max_constraint(
        &mut self,
        column: &str,
        column2: &str,
        use_upper_bound_reference: bool,
        settings: ConstraintSettings,
    ) -> Result<&mut Self> {
        self.add_date_extremum(ExtremumCheck::Max, column, column2, use_upper_bound_reference, settings)
    }

    fn add_length(&mut self, check: ExtremumCheck, column: &str, column2: &str, settings: ConstraintSettings) -> Result<&mut Self> {
        let references = self.column_references(column, column2, &settings);
        let constraint = VarCharLength::new(check, Self::core(references, settings));
        Ok(self.push(constraint))
    }

    pub fn add_varchar_min_length_constraint(
        &mut self,
        column: &str,
        column2: &str,
        settings: ConstraintSettings,
    ) -> Result<&mut Self> {
        self.add_length(ExtremumCheck::Min, column, column2, settings)
    }

    pub fn add_varchar_max_length_constraint(
        &mut self,
        column: &str,
        column2: &str,
        settings: ConstraintSettings,
    ) -> Result<&mut Self> {
        self.add_length(ExtremumCheck::Max, column, column2, settings)
    }

    fn add_column_names(&mut self, check: ColumnCheck, settings: ConstraintSettings) -> Result<&mut Self> {
        let references = (
            DataReference::new(self.data_source.clone(), None, None),
            DataReference::new(self.data_source2.clone(), None, None),
        );
        let constraint = ColumnNames::new(check, Self::core(references, settings))?;
        Ok(self.push(constraint))
    }

    /// Every column of the first source exists in the second.
    pub fn add_column_subset_constraint(&mut self, settings: ConstraintSettings) -> Result<&mut Self> {
        self.add_column_names(ColumnCheck::Subset, settings)
    }

    /// Every column of the second source exists in the first.
    pub fn add_column_superset_constraint(&mut self, settings: ConstraintSettings) -> Result<&mut Self> {
        self.add_column_names(ColumnCheck::Superset, settings)
    }

    /// Both columns have the same type.
    pub fn add_column_type_constraint(&mut self, column: &str, column2: &str, settings: ConstraintSettings) -> Result<&mut Self> {
        let references = (
            DataReference::new(self.data_source.clone(), Some(vec![column.to_string()]), None),
            DataReference::new(self.data_source2.clone(), Some(vec![column2.to_string()]), None),
        );
        let constraint = ColumnType::new(Self::core(references, settings));
        Ok(self.push(constraint))
    }

    fn add_rows(
        &mut self,
        check: RowCheck,
        selected: Option<&[&str]>,
        selected2: Option<&[&str]>,
        max_missing_fraction: ToleranceGetter,
        settings: ConstraintSettings,
    ) -> Result<&mut Self> {
        let references = self.references(selected, selected2, &settings);
        let constraint = RowComparison::new(check, Self::core(references, settings), max_missing_fraction)?;
        Ok(self.push(constraint))
    }

    /// At most `max_missing_fraction` of the distinct rows of both sources
    /// may be absent from the other one.
    pub fn add_row_equality_constraint(
        &mut self,
        selected: Option<&[&str]>,
        selected2: Option<&[&str]>,
        max_missing_fraction: f64,
        settings: ConstraintSettings,
    ) -> Result<&mut Self> {
        let getter = self.deviation_getter(GainTolerance::constant(max_missing_fraction))?;
        self.add_rows(RowCheck::Equality, selected, selected2, getter, settings)
    }

    /// Rows of the first source missing from the second may make up at most
    /// the tolerated fraction.
    pub fn add_row_subset_constraint(
        &mut self,
        selected: Option<&[&str]>,
        selected2: Option<&[&str]>,
        max_missing_fraction: GainTolerance,
        settings: ConstraintSettings,
    ) -> Result<&mut Self> {
        let getter = self.deviation_getter(max_missing_fraction)?;
        self.add_rows(RowCheck::Subset, selected, selected2, getter, settings)
    }

    /// Rows of the second source missing from the first may make up at most
    /// the tolerated fraction.
    pub fn add_row_superset_constraint(
        &mut self,
        selected: Option<&[&str]>,
        selected2: Option<&[&str]>,
        max_missing_fraction: GainTolerance,
        settings: ConstraintSettings,
    ) -> Result<&mut Self> {
        let getter = self.deviation_getter(max_missing_fraction)?;
        self.add_rows(RowCheck::Superset, selected, selected2, getter, settings)
    }

    /// Rows matched on the matching columns may differ on the comparison
    /// columns in at most `max_missing_fraction` of the matches.
    #[allow(clippy::too_many_arguments)]
    pub fn add_row_matching_equality_constraint(
        &mut self,
        matching_columns: &[&str],
        matching_columns2: &[&str],
        comparison_columns: &[&str],
        comparison_columns2: &[&str],
        max_missing_fraction: f64,
        settings: ConstraintSettings,
    ) -> Result<&mut Self> {
        let match_and_compare = MatchAndCompare::new(
            columns(matching_columns),
            columns(matching_columns2),
            columns(comparison_columns),
            columns(comparison_columns2),
        )?;
        let relevant: Vec<&str> = matching_columns.iter().chain(comparison_columns).copied().collect();
        let relevant2: Vec<&str> = matching_columns2.iter().chain(comparison_columns2).copied().collect();
        let references = self.references(Some(&relevant), Some(&relevant2), &settings);
        let constraint = RowMatchingEquality::new(
            Self::core(references, settings),
            match_and_compare,
            constant_tolerance(max_missing_fraction),
        )?;
        Ok(self.push(constraint))
    }

    /// Two-sample Kolmogorov-Smirnov test on `column` and `column2` at
    /// `significance_level`, conventionally 0.05.
    pub fn add_ks_2sample_constraint(
        &mut self,
        column: &str,
        column2: &str,
        significance_level: f64,
        settings: ConstraintSettings,
    ) -> Result<&mut Self> {
        if column.is_empty() || column2.is_empty() {
            return Err(JudgeError::configuration(
                "Column names have to be given for the Kolmogorov-Smirnov test.",
            ));
        }
        let references = self.column_references(column, column2, &settings);
        let constraint = KolmogorovSmirnov2Sample::new(Self::core(references, settings), significance_level)?;
        Ok(self.push(constraint))
    }
}

impl Requirement for BetweenRequirement {
    fn constraints(&self) -> &[BoxedConstraint] {
        &self.constraints
    }
}
