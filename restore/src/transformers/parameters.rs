use std::collections::{BTreeMap, HashSet};

use config::shared::{ParamValue, TransformerConfig};
use tokio_postgres::types::Type;

use crate::bail;
use crate::error::{ErrorKind, RestoreResult};
use crate::restore_error;
use crate::transformers::{DriverColumn, TableDriver, TransformerDefinition};
use crate::types::Record;

/// Constraints of a parameter whose value names a column.
#[derive(Debug, Clone, Default)]
pub struct ColumnProperties {
    /// Whether the transformer rewrites the named column.
    pub affected: bool,
    /// Postgres type names the column may have, e.g. `int4`.
    pub allowed_types: Vec<&'static str>,
}

impl ColumnProperties {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn affected(mut self, affected: bool) -> Self {
        self.affected = affected;
        self
    }

    pub fn allowed_types(mut self, allowed_types: &[&'static str]) -> Self {
        self.allowed_types = allowed_types.to_vec();
        self
    }

    fn allows(&self, type_name: &str) -> bool {
        self.allowed_types.contains(&type_name)
    }
}

/// Static declaration of one transformer parameter.
#[derive(Debug, Clone)]
pub struct ParameterDefinition {
    pub name: &'static str,
    pub description: &'static str,
    pub required: bool,
    pub default_value: Option<ParamValue>,
    pub column_properties: Option<ColumnProperties>,
    /// Sibling column parameter whose column type constrains this parameter's values.
    pub linked_parameter: Option<&'static str>,
    pub dynamic_mode_support: bool,
}

impl ParameterDefinition {
    pub fn new(name: &'static str, description: &'static str) -> Self {
        Self {
            name,
            description,
            required: false,
            default_value: None,
            column_properties: None,
            linked_parameter: None,
            dynamic_mode_support: false,
        }
    }

    pub fn required(mut self, required: bool) -> Self {
        self.required = required;
        self
    }

    pub fn default_value(mut self, value: impl Into<ParamValue>) -> Self {
        self.default_value = Some(value.into());
        self
    }

    pub fn column(mut self, properties: ColumnProperties) -> Self {
        self.column_properties = Some(properties);
        self
    }

    pub fn link_parameter(mut self, name: &'static str) -> Self {
        self.linked_parameter = Some(name);
        self
    }

    pub fn dynamic_mode_support(mut self, supported: bool) -> Self {
        self.dynamic_mode_support = supported;
        self
    }
}

/// Checks that a transformer's parameter declarations are consistent.
///
/// # Panics
/// Panics on an inconsistent declaration: these are programming errors, not runtime conditions.
pub(crate) fn validate_definitions(transformer: &str, definitions: &[ParameterDefinition]) {
    let mut names = HashSet::with_capacity(definitions.len());
    for definition in definitions {
        assert!(
            !definition.name.is_empty(),
            "transformer {transformer}: parameter with an empty name"
        );
        assert!(
            names.insert(definition.name),
            "transformer {transformer}: parameter `{}` is declared twice",
            definition.name
        );
        assert!(
            !(definition.required && definition.default_value.is_some()),
            "transformer {transformer}: required parameter `{}` cannot have a default value",
            definition.name
        );

        if let Some(properties) = &definition.column_properties {
            assert!(
                !properties.allowed_types.is_empty(),
                "transformer {transformer}: column parameter `{}` must allow at least one type",
                definition.name
            );
            assert!(
                !definition.dynamic_mode_support,
                "transformer {transformer}: column parameter `{}` cannot be dynamic",
                definition.name
            );
        }
    }

    for definition in definitions {
        let Some(linked) = definition.linked_parameter else {
            continue;
        };
        let sibling = definitions.iter().find(|sibling| sibling.name == linked);
        assert!(
            sibling.is_some_and(|sibling| sibling.column_properties.is_some()),
            "transformer {transformer}: parameter `{}` is linked to `{linked}`, which is not a column parameter",
            definition.name
        );
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum ParameterValue {
    Absent,
    Static(ParamValue),
    Dynamic(DriverColumn),
}

/// A parameter bound to a table.
///
/// Static values are scanned when the transformer is built; dynamic values are read from the
/// bound column of every record.
#[derive(Debug, Clone)]
pub struct Parameter {
    name: &'static str,
    transformer: &'static str,
    value: ParameterValue,
    /// Column named by a column parameter.
    column: Option<DriverColumn>,
    /// Column of the linked sibling parameter.
    linked_column: Option<DriverColumn>,
}

impl Parameter {
    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn is_dynamic(&self) -> bool {
        matches!(self.value, ParameterValue::Dynamic(_))
    }

    pub fn is_empty(&self) -> bool {
        self.value == ParameterValue::Absent
    }

    /// Column resolved for a column parameter.
    pub fn column(&self) -> Option<&DriverColumn> {
        self.column.as_ref()
    }

    pub fn scan_str(&self) -> RestoreResult<Option<&str>> {
        match &self.value {
            ParameterValue::Absent => Ok(None),
            ParameterValue::Static(value) => match value.as_str() {
                Ok(value) => Ok(Some(value)),
                Err(err) => Err(self.invalid(err.to_string())),
            },
            ParameterValue::Dynamic(_) => Err(self.not_static()),
        }
    }

    pub fn scan_bool(&self) -> RestoreResult<Option<bool>> {
        match &self.value {
            ParameterValue::Absent => Ok(None),
            ParameterValue::Static(value) => match value.to_bool() {
                Ok(value) => Ok(Some(value)),
                Err(err) => Err(self.invalid(err.to_string())),
            },
            ParameterValue::Dynamic(_) => Err(self.not_static()),
        }
    }

    /// Scans an integer. Dynamic parameters read `record`, which is then required.
    ///
    /// Values of a parameter linked to a column must fit that column's type.
    pub fn scan_i64(&self, record: Option<&Record>) -> RestoreResult<Option<i64>> {
        let value = match &self.value {
            ParameterValue::Absent => return Ok(None),
            ParameterValue::Static(value) => match value.to_i64() {
                Ok(value) => value,
                Err(err) => return Err(self.invalid(err.to_string())),
            },
            ParameterValue::Dynamic(column) => {
                let Some(record) = record else {
                    bail!(
                        ErrorKind::InvalidState,
                        "Dynamic parameter scanned without a record",
                        format!("{} is dynamic", self.label())
                    );
                };
                let Some(text) = record.text(column.index)? else {
                    bail!(
                        ErrorKind::TransformFailed,
                        "Dynamic parameter value is NULL",
                        format!("{} reads column `{}`", self.label(), column.name)
                    );
                };
                match text.trim().parse::<i64>() {
                    Ok(value) => value,
                    Err(err) => {
                        return Err(restore_error!(
                            ErrorKind::TransformFailed,
                            "Dynamic parameter value is not an integer",
                            format!("{} read `{text}` from column `{}`", self.label(), column.name),
                            source: err
                        ));
                    }
                }
            }
        };

        self.check_range(value)?;

        Ok(Some(value))
    }

    fn check_range(&self, value: i64) -> RestoreResult<()> {
        let Some(linked_column) = &self.linked_column else {
            return Ok(());
        };

        let (min, max) = match linked_column.typ {
            Type::INT2 => (i64::from(i16::MIN), i64::from(i16::MAX)),
            Type::INT4 => (i64::from(i32::MIN), i64::from(i32::MAX)),
            _ => return Ok(()),
        };

        if value < min || value > max {
            let kind = if self.is_dynamic() {
                ErrorKind::TransformFailed
            } else {
                ErrorKind::InvalidParameter
            };
            bail!(
                kind,
                "Parameter value out of range for the column type",
                format!(
                    "{}: {value} does not fit column `{}` of type {}",
                    self.label(),
                    linked_column.name,
                    linked_column.type_name()
                )
            );
        }

        Ok(())
    }

    fn label(&self) -> String {
        format!("parameter `{}` of transformer {}", self.name, self.transformer)
    }

    fn invalid(&self, detail: String) -> crate::error::RestoreError {
        restore_error!(
            ErrorKind::InvalidParameter,
            "Invalid transformer parameter",
            format!("{}: {detail}", self.label())
        )
    }

    fn not_static(&self) -> crate::error::RestoreError {
        restore_error!(
            ErrorKind::InvalidParameter,
            "Parameter must be static",
            format!("{} cannot be dynamic", self.label())
        )
    }
}

/// The parameters of one transformer instance, keyed by name.
#[derive(Debug, Clone, Default)]
pub struct Parameters {
    transformer: &'static str,
    parameters: BTreeMap<&'static str, Parameter>,
}

impl Parameters {
    /// Removes and returns a declared parameter.
    pub fn take(&mut self, name: &str) -> RestoreResult<Parameter> {
        match self.parameters.remove(name) {
            Some(parameter) => Ok(parameter),
            None => bail!(
                ErrorKind::InvalidState,
                "Parameter is not declared",
                format!(
                    "transformer {} has no parameter `{name}`",
                    self.transformer
                )
            ),
        }
    }

    pub fn get(&self, name: &str) -> Option<&Parameter> {
        self.parameters.get(name)
    }

    /// Columns named by parameters declared as affecting their column.
    pub fn affected_columns(&self, definition: &TransformerDefinition) -> BTreeMap<usize, String> {
        definition
            .parameters
            .iter()
            .filter(|parameter| {
                parameter
                    .column_properties
                    .as_ref()
                    .is_some_and(|properties| properties.affected)
            })
            .filter_map(|parameter| self.parameters.get(parameter.name)?.column())
            .map(|column| (column.index, column.name.clone()))
            .collect()
    }
}

/// Binds configured values to a transformer's declared parameters for one table.
///
/// Every failure names the offending parameter and, where relevant, the column.
pub fn bind_parameters(
    definition: &TransformerDefinition,
    config: &TransformerConfig,
    driver: &TableDriver,
) -> RestoreResult<Parameters> {
    let transformer = definition.name;
    let label = |name: &str| format!("parameter `{name}` of transformer {transformer}");

    for name in config.params.keys().chain(config.dynamic_params.keys()) {
        if !definition.parameters.iter().any(|parameter| parameter.name == name) {
            bail!(
                ErrorKind::InvalidParameter,
                "Unknown transformer parameter",
                format!("{} is not declared", label(name))
            );
        }
    }

    // Column parameters first so that linked parameters can see their sibling's column.
    let ordered = definition
        .parameters
        .iter()
        .filter(|parameter| parameter.column_properties.is_some())
        .chain(
            definition
                .parameters
                .iter()
                .filter(|parameter| parameter.column_properties.is_none()),
        );

    let mut parameters: BTreeMap<&'static str, Parameter> = BTreeMap::new();
    for parameter_definition in ordered {
        let name = parameter_definition.name;
        let static_value = config.params.get(name);
        let dynamic_value = config.dynamic_params.get(name);

        let value = match (static_value, dynamic_value) {
            (Some(_), Some(_)) => bail!(
                ErrorKind::InvalidParameter,
                "Parameter is both static and dynamic",
                format!("{} has a value and a dynamic column", label(name))
            ),
            (None, Some(dynamic)) => {
                if !parameter_definition.dynamic_mode_support {
                    bail!(
                        ErrorKind::InvalidParameter,
                        "Parameter does not support dynamic mode",
                        label(name)
                    );
                }
                let Some(column) = driver.column_by_name(&dynamic.column) else {
                    bail!(
                        ErrorKind::ColumnNotFound,
                        "Column not found",
                        format!(
                            "column `{}` of {} is not found in table {}",
                            dynamic.column,
                            label(name),
                            driver.table_name()
                        )
                    );
                };
                ParameterValue::Dynamic(column.clone())
            }
            (Some(value), None) => ParameterValue::Static(value.clone()),
            (None, None) => match &parameter_definition.default_value {
                Some(default) => ParameterValue::Static(default.clone()),
                None if parameter_definition.required => bail!(
                    ErrorKind::InvalidParameter,
                    "Missing required parameter",
                    format!("{} is required", label(name))
                ),
                None => ParameterValue::Absent,
            },
        };

        let column = match (&parameter_definition.column_properties, &value) {
            (Some(properties), ParameterValue::Static(value)) => {
                let column_name = value.as_str().map_err(|err| {
                    restore_error!(
                        ErrorKind::InvalidParameter,
                        "Invalid transformer parameter",
                        format!("{}: {err}", label(name))
                    )
                })?;
                let Some(column) = driver.column_by_name(column_name) else {
                    bail!(
                        ErrorKind::ColumnNotFound,
                        "Column not found",
                        format!(
                            "column with name `{column_name}` of {} is not found in table {}",
                            label(name),
                            driver.table_name()
                        )
                    );
                };
                if !properties.allows(column.type_name()) {
                    bail!(
                        ErrorKind::InvalidParameter,
                        "Column type is not supported by the transformer",
                        format!(
                            "column `{column_name}` of {} has type {}, expected one of {}",
                            label(name),
                            column.type_name(),
                            properties.allowed_types.join(", ")
                        )
                    );
                }
                Some(column.clone())
            }
            _ => None,
        };

        let linked_column = parameter_definition
            .linked_parameter
            .and_then(|linked| parameters.get(linked))
            .and_then(|linked| linked.column.clone());

        parameters.insert(
            name,
            Parameter {
                name,
                transformer,
                value,
                column,
                linked_column,
            },
        );
    }

    Ok(Parameters {
        transformer,
        parameters,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transformers::driver::orders_schema;
    use crate::transformers::{Transformer, TransformerDefinition};

    fn unreachable_constructor(
        _: &TableDriver,
        _: Parameters,
    ) -> RestoreResult<Box<dyn Transformer>> {
        unreachable!("not built in these tests")
    }

    fn definition() -> TransformerDefinition {
        TransformerDefinition::new(
            "Bounded",
            "test transformer",
            vec![
                ParameterDefinition::new("column", "target column")
                    .required(true)
                    .column(
                        ColumnProperties::new()
                            .affected(true)
                            .allowed_types(&["int2", "int4"]),
                    ),
                ParameterDefinition::new("limit", "upper bound")
                    .link_parameter("column")
                    .dynamic_mode_support(true),
                ParameterDefinition::new("enabled", "flag").default_value(true),
            ],
            unreachable_constructor,
        )
    }

    fn driver() -> TableDriver {
        TableDriver::new(&orders_schema(), None).unwrap()
    }

    #[test]
    fn binds_static_default_and_absent_values() {
        let definition = definition();
        let config = TransformerConfig::new("Bounded").with_param("column", "priority");
        let parameters = bind_parameters(&definition, &config, &driver()).unwrap();

        let column = parameters.get("column").unwrap().column().unwrap();
        assert_eq!((column.index, column.name.as_str()), (3, "priority"));
        assert_eq!(
            parameters.get("enabled").unwrap().scan_bool().unwrap(),
            Some(true)
        );
        assert!(parameters.get("limit").unwrap().is_empty());
        assert_eq!(
            parameters.affected_columns(&definition),
            BTreeMap::from([(3, "priority".to_string())])
        );
    }

    #[test]
    fn missing_column_names_the_column_and_parameter() {
        let config = TransformerConfig::new("Bounded").with_param("column", "ghost");
        let err = bind_parameters(&definition(), &config, &driver()).unwrap_err();

        assert_eq!(err.kind(), ErrorKind::ColumnNotFound);
        let detail = err.detail().unwrap();
        assert!(detail.contains("`ghost`"));
        assert!(detail.contains("parameter `column`"));
    }

    #[test]
    fn construction_errors_are_attributed_to_the_parameter() {
        let definition = definition();
        let driver = driver();

        let missing = TransformerConfig::new("Bounded");
        let err = bind_parameters(&definition, &missing, &driver).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidParameter);
        assert!(err.detail().unwrap().contains("parameter `column`"));

        let unknown = TransformerConfig::new("Bounded")
            .with_param("column", "id")
            .with_param("colour", "red");
        let err = bind_parameters(&definition, &unknown, &driver).unwrap_err();
        assert!(err.detail().unwrap().contains("parameter `colour`"));

        let wrong_type = TransformerConfig::new("Bounded").with_param("column", "note");
        let err = bind_parameters(&definition, &wrong_type, &driver).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidParameter);
        assert!(err.detail().unwrap().contains("text"));

        let not_dynamic = TransformerConfig::new("Bounded")
            .with_param("column", "id")
            .with_dynamic_param("enabled", "id");
        let err = bind_parameters(&definition, &not_dynamic, &driver).unwrap_err();
        assert!(err.detail().unwrap().contains("parameter `enabled`"));
    }

    #[test]
    fn linked_values_are_range_checked_against_the_column_type() {
        let definition = definition();
        let config = TransformerConfig::new("Bounded")
            .with_param("column", "priority")
            .with_param("limit", 40_000i64);
        let parameters = bind_parameters(&definition, &config, &driver()).unwrap();

        let err = parameters.get("limit").unwrap().scan_i64(None).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidParameter);
        assert!(err.detail().unwrap().contains("int2"));
    }

    #[test]
    fn dynamic_values_are_read_from_the_record() {
        let definition = definition();
        let config = TransformerConfig::new("Bounded")
            .with_param("column", "id")
            .with_dynamic_param("limit", "user_id");
        let parameters = bind_parameters(&definition, &config, &driver()).unwrap();
        let limit = parameters.get("limit").unwrap();
        assert!(limit.is_dynamic());

        let record = Record::from_text([Some("1"), Some("70"), None, None, None]);
        assert_eq!(limit.scan_i64(Some(&record)).unwrap(), Some(70));

        let null = Record::from_text([Some("1"), None, None, None, None]);
        let err = limit.scan_i64(Some(&null)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::TransformFailed);

        let err = limit.scan_i64(None).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidState);
    }

    #[test]
    #[should_panic(expected = "must allow at least one type")]
    fn column_parameter_without_types_panics() {
        TransformerDefinition::new(
            "Broken",
            "",
            vec![ParameterDefinition::new("column", "").column(ColumnProperties::new())],
            unreachable_constructor,
        );
    }

    #[test]
    #[should_panic(expected = "not a column parameter")]
    fn link_to_a_non_column_parameter_panics() {
        TransformerDefinition::new(
            "Broken",
            "",
            vec![
                ParameterDefinition::new("min", ""),
                ParameterDefinition::new("max", "").link_parameter("min"),
            ],
            unreachable_constructor,
        );
    }
}
