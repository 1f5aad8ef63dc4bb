use super::{columns, ConstraintSettings, Requirement};
use crate::constraints::{
    CategoricalBound, ColumnCheck, ColumnNames, ColumnType, DateBetween, DateExtremum,
    DuplicateTolerance, ExtremumCheck, FunctionalDependency, GroupByAggregation,
    IntervalConstraint, IntervalOptions, MaxNullFraction, NRows, NRowsCheck, NUniques,
    NUniquesCheck, NumericBetween, NumericExtremum, NumericMean, NumericPercentile,
    PrimaryKeyDefinition, RegexOptions, ShareBounds, UniqueValues, Uniqueness, Uniques,
    UniquesCheck, UniquesOptions, VarCharLength, VarCharRegex, VarCharRegexDb,
};
use crate::core::{
    parse_date, BoxedConstraint, Constraint, ConstraintCore, DataReference, DataSource, Value,
};
use crate::db_access::GapKind;
use crate::prelude::*;
use crate::utils::OutputProcessor;
use chrono::NaiveDate;
use tracing::debug;

/// Constraints over a single data source.
#[derive(Debug)]
pub struct WithinRequirement {
    data_source: DataSource,
    constraints: Vec<BoxedConstraint>,
}

fn parse_date_parameter(text: &str, name: &str) -> Result<NaiveDate> {
    parse_date(text).ok_or_else(|| {
        JudgeError::configuration(format!("{name} '{text}' is not a date (expected YYYY-MM-DD)."))
    })
}

impl WithinRequirement {
    pub fn new(data_source: DataSource) -> Self {
        Self {
            data_source,
            constraints: Vec::new(),
        }
    }

    pub fn from_table(db: &str, schema: Option<&str>, table: &str) -> Self {
        Self::new(DataSource::table(db, schema, table))
    }

    /// A requirement over an arbitrary SELECT statement.
    ///
    /// `name` represents the query in failure messages. Constraints relying
    /// on specific columns need them declared in `columns`.
    pub fn from_raw_query(query: &str, name: &str, columns: Option<Vec<String>>) -> Self {
        Self::new(DataSource::raw_query(query, name, columns))
    }

    /// A requirement over a backend relation expression such as a
    /// table-valued function call.
    pub fn from_expression(expression: &str, name: &str) -> Self {
        Self::new(DataSource::expression(expression, name))
    }

    pub fn data_source(&self) -> &DataSource {
        &self.data_source
    }

    fn push(&mut self, constraint: impl Constraint + 'static) -> &mut Self {
        debug!(constraint.description = %constraint.description(), "Added constraint");
        self.constraints.push(Box::new(constraint));
        self
    }

    fn reference(&self, selected: Option<&[&str]>, settings: &ConstraintSettings) -> DataReference {
        settings.reference(&self.data_source, selected.map(columns))
    }

    fn column_reference(&self, column: &str, settings: &ConstraintSettings) -> DataReference {
        settings.reference(&self.data_source, Some(vec![column.to_string()]))
    }

    fn core<F: Clone + Send, T: Clone + Send>(
        &self,
        reference: DataReference,
        target: T,
        settings: ConstraintSettings,
    ) -> ConstraintCore<F, T> {
        ConstraintCore::within(reference, target, settings.name, settings.cache_size)
    }

    /// The source must have all of `expected` among its columns.
    pub fn add_column_existence_constraint(
        &mut self,
        expected: &[&str],
        settings: ConstraintSettings,
    ) -> Result<&mut Self> {
        let reference = DataReference::new(self.data_source.clone(), None, None);
        let constraint = ColumnNames::new(ColumnCheck::Existence, self.core(reference, columns(expected), settings))?;
        Ok(self.push(constraint))
    }

    /// The declared primary key must consist of exactly `primary_keys`.
    ///
    /// This does not check that key values are unique.
    pub fn add_primary_key_definition_constraint(
        &mut self,
        primary_keys: &[&str],
        settings: ConstraintSettings,
    ) -> Result<&mut Self> {
        let reference = DataReference::new(self.data_source.clone(), None, None);
        let constraint = PrimaryKeyDefinition::new(self.core(reference, columns(primary_keys), settings));
        Ok(self.push(constraint))
    }

    /// Tuples of `selected` must be unique up to `tolerance`.
    ///
    /// Without columns, whole rows must be unique. With `infer_pk_columns`,
    /// the declared primary key is used instead.
    pub fn add_uniqueness_constraint(
        &mut self,
        selected: Option<&[&str]>,
        tolerance: DuplicateTolerance,
        infer_pk_columns: bool,
        settings: ConstraintSettings,
    ) -> Result<&mut Self> {
        let reference = self.reference(selected, &settings);
        let constraint = Uniqueness::new(self.core(reference, (), settings), tolerance, infer_pk_columns);
        Ok(self.push(constraint))
    }

    /// The type of `column` must start with `column_type`, e.g. `varchar`.
    pub fn add_column_type_constraint(
        &mut self,
        column: &str,
        column_type: &str,
        settings: ConstraintSettings,
    ) -> Result<&mut Self> {
        let reference = DataReference::new(self.data_source.clone(), Some(vec![column.to_string()]), None);
        let constraint = ColumnType::new(self.core(reference, column_type.to_string(), settings));
        Ok(self.push(constraint))
    }

    pub fn add_null_absence_constraint(&mut self, column: &str, settings: ConstraintSettings) -> Result<&mut Self> {
        let reference = self.column_reference(column, &settings);
        let constraint = MaxNullFraction::null_absence(reference, settings.name, settings.cache_size);
        Ok(self.push(constraint))
    }

    /// At most `max_null_fraction` of the values of `column` may be NULL.
    pub fn add_max_null_fraction_constraint(
        &mut self,
        column: &str,
        max_null_fraction: f64,
        settings: ConstraintSettings,
    ) -> Result<&mut Self> {
        let reference = self.column_reference(column, &settings);
        let constraint = MaxNullFraction::new(self.core(reference, max_null_fraction, settings), 0.0)?;
        Ok(self.push(constraint))
    }

    fn add_n_rows(&mut self, check: NRowsCheck, n_rows: i64, settings: ConstraintSettings) -> Result<&mut Self> {
        if n_rows < 0 {
            return Err(JudgeError::configuration(format!("Expected a non-negative row count, got {n_rows}.")));
        }
        let reference = self.reference(None, &settings);
        let constraint = NRows::new(check, self.core(reference, n_rows, settings))?;
        Ok(self.push(constraint))
    }

    pub fn add_n_rows_equality_constraint(&mut self, n_rows: i64, settings: ConstraintSettings) -> Result<&mut Self> {
        self.add_n_rows(NRowsCheck::Equality, n_rows, settings)
    }

    pub fn add_n_rows_min_constraint(&mut self, n_rows_min: i64, settings: ConstraintSettings) -> Result<&mut Self> {
        self.add_n_rows(NRowsCheck::Min, n_rows_min, settings)
    }

    pub fn add_n_rows_max_constraint(&mut self, n_rows_max: i64, settings: ConstraintSettings) -> Result<&mut Self> {
        self.add_n_rows(NRowsCheck::Max, n_rows_max, settings)
    }

    fn add_uniques<V: Into<Value>>(
        &mut self,
        check: UniquesCheck,
        selected: &[&str],
        uniques: impl IntoIterator<Item = V>,
        options: UniquesOptions,
        settings: ConstraintSettings,
    ) -> Result<&mut Self> {
        let reference = self.reference(Some(selected), &settings);
        let target = UniqueValues::literal(uniques);
        let constraint = Uniques::new(check, self.core(reference, target, settings), options)?;
        Ok(self.push(constraint))
    }

    /// The distinct values of `selected` must be exactly `uniques`.
    pub fn add_uniques_equality_constraint<V: Into<Value>>(
        &mut self,
        selected: &[&str],
        uniques: impl IntoIterator<Item = V>,
        options: UniquesOptions,
        settings: ConstraintSettings,
    ) -> Result<&mut Self> {
        self.add_uniques(UniquesCheck::Equality, selected, uniques, options, settings)
    }

    /// Every value of `uniques` must occur in `selected`, up to
    /// `max_relative_violations` of them.
    pub fn add_uniques_superset_constraint<V: Into<Value>>(
        &mut self,
        selected: &[&str],
        uniques: impl IntoIterator<Item = V>,
        options: UniquesOptions,
        settings: ConstraintSettings,
    ) -> Result<&mut Self> {
        self.add_uniques(UniquesCheck::Superset, selected, uniques, options, settings)
    }

    /// Every value of `selected` must occur in `uniques`, up to
    /// `max_relative_violations` of the rows (or distinct values with
    /// `compare_distinct`).
    pub fn add_uniques_subset_constraint<V: Into<Value>>(
        &mut self,
        selected: &[&str],
        uniques: impl IntoIterator<Item = V>,
        options: UniquesOptions,
        settings: ConstraintSettings,
    ) -> Result<&mut Self> {
        self.add_uniques(UniquesCheck::Subset, selected, uniques, options, settings)
    }

    pub fn add_n_uniques_equality_constraint(
        &mut self,
        selected: Option<&[&str]>,
        n_uniques: i64,
        settings: ConstraintSettings,
    ) -> Result<&mut Self> {
        let reference = self.reference(selected, &settings);
        let constraint = NUniques::new(NUniquesCheck::Equality, self.core(reference, n_uniques, settings))?;
        Ok(self.push(constraint))
    }

    /// The share of rows of every value of `selected` must lie within its
    /// bounds in `distribution`, or within `default_bounds` if absent.
    pub fn add_categorical_bound_constraint(
        &mut self,
        selected: &[&str],
        distribution: Vec<(Value, ShareBounds)>,
        default_bounds: ShareBounds,
        max_relative_violations: f64,
        settings: ConstraintSettings,
    ) -> Result<&mut Self> {
        let reference = self.reference(Some(selected), &settings);
        let constraint = CategoricalBound::new(
            self.core(reference, distribution, settings),
            default_bounds,
            max_relative_violations,
        )?;
        Ok(self.push(constraint))
    }

    /// All values of `column` are at least `min_value`.
    pub fn add_numeric_min_constraint(
        &mut self,
        column: &str,
        min_value: impl Into<Value>,
        settings: ConstraintSettings,
    ) -> Result<&mut Self> {
        let reference = self.column_reference(column, &settings);
        let constraint = NumericExtremum::new(ExtremumCheck::Min, self.core(reference, min_value.into(), settings));
        Ok(self.push(constraint))
    }

    /// All values of `column` are at most `max_value`.
    pub fn add_numeric_max_constraint(
        &mut self,
        column: &str,
        max_value: impl Into<Value>,
        settings: ConstraintSettings,
    ) -> Result<&mut Self> {
        let reference = self.column_reference(column, &settings);
        let constraint = NumericExtremum::new(ExtremumCheck::Max, self.core(reference, max_value.into(), settings));
        Ok(self.push(constraint))
    }

    /// At least `min_fraction` of the values of `column` lie within
    /// `[lower_bound, upper_bound]`.
    pub fn add_numeric_between_constraint(
        &mut self,
        column: &str,
        lower_bound: impl Into<Value>,
        upper_bound: impl Into<Value>,
        min_fraction: f64,
        settings: ConstraintSettings,
    ) -> Result<&mut Self> {
        let reference = self.column_reference(column, &settings);
        let constraint = NumericBetween::new(
            self.core(reference, min_fraction, settings),
            lower_bound.into(),
            upper_bound.into(),
        )?;
        Ok(self.push(constraint))
    }

    /// The mean of `column` deviates at most `max_absolute_deviation` from
    /// `mean_value`.
    pub fn add_numeric_mean_constraint(
        &mut self,
        column: &str,
        mean_value: f64,
        max_absolute_deviation: f64,
        settings: ConstraintSettings,
    ) -> Result<&mut Self> {
        let reference = self.column_reference(column, &settings);
        let constraint = NumericMean::new(self.core(reference, Some(mean_value), settings), max_absolute_deviation)?;
        Ok(self.push(constraint))
    }

    /// The `percentage`-th percentile of `column` is approximately
    /// `expected_percentile`.
    pub fn add_numeric_percentile_constraint(
        &mut self,
        column: &str,
        percentage: f64,
        expected_percentile: f64,
        max_absolute_deviation: Option<f64>,
        max_relative_deviation: Option<f64>,
        settings: ConstraintSettings,
    ) -> Result<&mut Self> {
        let reference = self.column_reference(column, &settings);
        let constraint = NumericPercentile::new(
            self.core(reference, expected_percentile, settings),
            percentage,
            max_absolute_deviation,
            max_relative_deviation,
        )?;
        Ok(self.push(constraint))
    }

    fn add_date_extremum(
        &mut self,
        check: ExtremumCheck,
        column: &str,
        value: &str,
        use_bound_reference: bool,
        settings: ConstraintSettings,
    ) -> Result<&mut Self> {
        let date = parse_date_parameter(value, "Date bound")?;
        let reference = self.column_reference(column, &settings);
        let constraint = DateExtremum::new(check, self.core(reference, Some(date), settings), use_bound_reference);
        Ok(self.push(constraint))
    }

    /// All dates of `column` are at or after `min_value`.
    ///
    /// With `use_lower_bound_reference` unset, the minimum must instead not
    /// exceed `min_value`.
    pub fn add_date_min_constraint(
        &mut self,
        column: &str,
        min_value: &str,
        use_lower_bound_reference: bool,
        settings: ConstraintSettings,
    ) -> Result<&mut Self> {
        self.add_date_extremum(ExtremumCheck::Min, column, min_value, use_lower_bound_reference, settings)
    }

    /// All dates of `column` are at or before `max_value`.
    ///
    /// With `use_upper_bound_reference` unset, the maximum must instead
    /// reach at least `max_value`.
    pub fn add_date_max_constraint(
        &mut self,
        column: &str,
        max_value: &str,
        use_upper_bound_reference: bool,
        settings: ConstraintSettings,
    ) -> Result<&mut Self> {
        self.add_date_extremum(ExtremumCheck::Max, column, max_value, use_upper_bound_reference, settings)
    }

    pub fn add_date_between_constraint(
        &mut self,
        column: &str,
        lower_bound: &str,
        upper_bound: &str,
        min_fraction: f64,
        settings: ConstraintSettings,
    ) -> Result<&mut Self> {
        let lower = parse_date_parameter(lower_bound, "Lower bound")?;
        let upper = parse_date_parameter(upper_bound, "Upper bound")?;
        let reference = self.column_reference(column, &settings);
        let constraint = DateBetween::new(self.core(reference, min_fraction, settings), lower, upper)?;
        Ok(self.push(constraint))
    }

    /// Columns of the reference for an interval constraint: the ranges plus
    /// the keys, or every column if `all_without_keys` and no keys are given.
    fn interval_columns(ranges: &[&str], options: &IntervalOptions, all_without_keys: bool) -> Option<Vec<String>> {
        match &options.key_columns {
            None if all_without_keys => None,
            keys => {
                let mut relevant = columns(ranges);
                relevant.extend(keys.iter().flatten().cloned());
                Some(relevant)
            }
        }
    }

    fn add_overlap(
        &mut self,
        domain: GapKind,
        starts: &[&str],
        ends: &[&str],
        options: IntervalOptions,
        settings: ConstraintSettings,
    ) -> Result<&mut Self> {
        let ranges: Vec<&str> = starts.iter().chain(ends).copied().collect();
        let selected = Self::interval_columns(&ranges, &options, false);
        let reference = settings.reference(&self.data_source, selected);
        let constraint = IntervalConstraint::no_overlap(
            self.core(reference, (), settings),
            domain,
            columns(starts),
            columns(ends),
            options,
        )?;
        Ok(self.push(constraint))
    }

    fn add_gap(
        &mut self,
        domain: GapKind,
        start_column: &str,
        end_column: &str,
        options: IntervalOptions,
        settings: ConstraintSettings,
    ) -> Result<&mut Self> {
        let selected = Self::interval_columns(&[start_column, end_column], &options, true);
        let reference = settings.reference(&self.data_source, selected);
        let constraint = IntervalConstraint::no_gap(
            self.core(reference, (), settings),
            domain,
            start_column.to_string(),
            end_column.to_string(),
            options,
        )?;
        Ok(self.push(constraint))
    }

    /// Date ranges sharing a key must not overlap.
    pub fn add_date_no_overlap_constraint(
        &mut self,
        start_column: &str,
        end_column: &str,
        options: IntervalOptions,
        settings: ConstraintSettings,
    ) -> Result<&mut Self> {
        self.add_overlap(GapKind::Date, &[start_column], &[end_column], options, settings)
    }

    /// Date rectangles sharing a key must not overlap in both dimensions.
    pub fn add_date_no_overlap_2d_constraint(
        &mut self,
        start_column1: &str,
        end_column1: &str,
        start_column2: &str,
        end_column2: &str,
        options: IntervalOptions,
        settings: ConstraintSettings,
    ) -> Result<&mut Self> {
        self.add_overlap(
            GapKind::Date,
            &[start_column1, start_column2],
            &[end_column1, end_column2],
            options,
            settings,
        )
    }

    /// Consecutive date ranges sharing a key must leave no gap.
    pub fn add_date_no_gap_constraint(
        &mut self,
        start_column: &str,
        end_column: &str,
        options: IntervalOptions,
        settings: ConstraintSettings,
    ) -> Result<&mut Self> {
        self.add_gap(GapKind::Date, start_column, end_column, options, settings)
    }

    /// Consecutive numeric ranges sharing a key must be at most
    /// `legitimate_gap_size` apart.
    pub fn add_numeric_no_gap_constraint(
        &mut self,
        start_column: &str,
        end_column: &str,
        options: IntervalOptions,
        settings: ConstraintSettings,
    ) -> Result<&mut Self> {
        self.add_gap(GapKind::Numeric, start_column, end_column, options, settings)
    }

    pub fn add_numeric_no_overlap_constraint(
        &mut self,
        start_column: &str,
        end_column: &str,
        options: IntervalOptions,
        settings: ConstraintSettings,
    ) -> Result<&mut Self> {
        self.add_overlap(GapKind::Numeric, &[start_column], &[end_column], options, settings)
    }

    /// Rows agreeing on `key_columns` must agree on `value_columns`.
    pub fn add_functional_dependency_constraint(
        &mut self,
        key_columns: &[&str],
        value_columns: &[&str],
        output_processors: Vec<OutputProcessor>,
        settings: ConstraintSettings,
    ) -> Result<&mut Self> {
        let relevant: Vec<&str> = key_columns.iter().chain(value_columns).copied().collect();
        let reference = self.reference(Some(&relevant), &settings);
        let constraint = FunctionalDependency::new(
            self.core(reference, (), settings),
            columns(key_columns),
            output_processors,
        )?;
        Ok(self.push(constraint))
    }

    /// Values of `column` must fully match `regex`, evaluated in memory.
    pub fn add_varchar_regex_constraint(
        &mut self,
        column: &str,
        regex: &str,
        options: RegexOptions,
        settings: ConstraintSettings,
    ) -> Result<&mut Self> {
        let reference = self.column_reference(column, &settings);
        let constraint = VarCharRegex::new(self.core(reference, (), settings), regex, options)?;
        Ok(self.push(constraint))
    }

    /// Values of `column` must fully match `regex`, evaluated by the
    /// database.
    pub fn add_varchar_regex_constraint_db(
        &mut self,
        column: &str,
        regex: &str,
        options: RegexOptions,
        settings: ConstraintSettings,
    ) -> Result<&mut Self> {
        let reference = self.column_reference(column, &settings);
        let constraint = VarCharRegexDb::new(self.core(reference, (), settings), regex, options)?;
        Ok(self.push(constraint))
    }

    fn add_length(
        &mut self,
        check: ExtremumCheck,
        column: &str,
        length: i64,
        settings: ConstraintSettings,
    ) -> Result<&mut Self> {
        let reference = self.column_reference(column, &settings);
        let constraint = VarCharLength::new(check, self.core(reference, Some(length), settings));
        Ok(self.push(constraint))
    }

    pub fn add_varchar_min_length_constraint(
        &mut self,
        column: &str,
        min_length: i64,
        settings: ConstraintSettings,
    ) -> Result<&mut Self> {
        self.add_length(ExtremumCheck::Min, column, min_length, settings)
    }

    pub fn add_varchar_max_length_constraint(
        &mut self,
        column: &str,
        max_length: i64,
        settings: ConstraintSettings,
    ) -> Result<&mut Self> {
        self.add_length(ExtremumCheck::Max, column, max_length, settings)
    }

    /// Per group of `selected`, the values of `aggregation_column` must
    /// cover `start_value` up to their maximum.
    pub fn add_groupby_aggregation_constraint(
        &mut self,
        selected: &[&str],
        aggregation_column: &str,
        start_value: i64,
        tolerance: f64,
        settings: ConstraintSettings,
    ) -> Result<&mut Self> {
        let reference = self.reference(Some(selected), &settings);
        let constraint = GroupByAggregation::new(
            self.core(reference, (), settings),
            aggregation_column,
            start_value,
            tolerance,
        )?;
        Ok(self.push(constraint))
    }
}

impl Requirement for WithinRequirement {
    fn constraints(&self) -> &[BoxedConstraint] {
        &self.constraints
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{Condition, ExecutionContext};
    use crate::test_helpers::{datafusion_context, int_table, nullable_int_table};

    fn requirement(name: &str) -> WithinRequirement {
        WithinRequirement::from_table("datafusion", Some("public"), name)
    }

    fn context() -> ExecutionContext {
        let values: Vec<i64> = (1..20).collect();
        datafusion_context(vec![
            ("numbers", int_table("col", &values)),
            ("gappy", nullable_int_table("col", &[Some(1), None, Some(3)])),
        ])
    }

    #[tokio::test]
    async fn test_constraints_run_in_order() {
        let ctx = context();
        let mut within = requirement("numbers");
        within
            .add_n_rows_min_constraint(19, ConstraintSettings::new())
            .unwrap()
            .add_n_rows_min_constraint(20, ConstraintSettings::new())
            .unwrap()
            .add_numeric_max_constraint("col", 19, ConstraintSettings::new().with_name("bounded"))
            .unwrap();
        assert_eq!(within.len(), 3);

        let results = within.test(&ctx).await.unwrap();
        let outcomes: Vec<bool> = results.iter().map(|r| r.outcome).collect();
        assert_eq!(outcomes, vec![true, false, true]);
        assert_eq!(results[2].description.as_deref(), Some("bounded"));
    }

    #[tokio::test]
    async fn test_condition_is_applied() {
        let ctx = context();
        let mut within = requirement("numbers");
        let small = ConstraintSettings::new().with_condition(Condition::raw("col < 10").unwrap());
        within.add_n_rows_equality_constraint(9, small).unwrap();
        assert!(within.test(&ctx).await.unwrap()[0].outcome);
    }

    #[tokio::test]
    async fn test_null_constraints() {
        let ctx = context();
        let mut within = requirement("gappy");
        within
            .add_null_absence_constraint("col", ConstraintSettings::new())
            .unwrap()
            .add_max_null_fraction_constraint("col", 0.5, ConstraintSettings::new())
            .unwrap();
        let results = within.test(&ctx).await.unwrap();
        assert!(!results[0].outcome);
        assert!(results[1].outcome);
    }

    #[test]
    fn test_configuration_errors_surface_when_building() {
        let mut within = requirement("numbers");
        assert!(within.add_n_rows_min_constraint(-1, ConstraintSettings::new()).is_err());
        assert!(within
            .add_date_min_constraint("d", "not a date", true, ConstraintSettings::new())
            .is_err());
        assert!(within
            .add_uniques_equality_constraint(
                &["col"],
                [1, 2],
                UniquesOptions::new().with_max_relative_violations(0.1),
                ConstraintSettings::new()
            )
            .is_err());
        assert!(within.is_empty());
    }
}
