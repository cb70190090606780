//! Tabular input and the `Surv(time, status) ~ x1 + x2` formula contract.
//!
//! Columns reaching the core are already numeric: categorical variables are
//! expected to arrive as dummy columns from whatever did the preprocessing.

use std::fmt;
use std::io::Read;
use std::str::FromStr;

use ndarray::Array2;

use crate::data::SurvivalData;
use crate::error::{Result, SurvivalError};

/// named numeric columns of equal length
#[derive(Debug, Clone, PartialEq)]
pub struct Table {
    names: Vec<String>,
    columns: Vec<Vec<f64>>,
}

impl Table {
    pub fn new() -> Self {
        Self {
            names: Vec::new(),
            columns: Vec::new(),
        }
    }

    /// add a column - must match the length of existing columns
    pub fn with_column(mut self, name: impl Into<String>, values: Vec<f64>) -> Result<Self> {
        let name = name.into();
        if self.names.contains(&name) {
            return Err(SurvivalError::invalid_input(format!("duplicate column '{}'", name)));
        }
        if let Some(first) = self.columns.first() {
            if first.len() != values.len() {
                return Err(SurvivalError::invalid_dimensions(format!(
                    "column '{}' has {} rows, table has {}",
                    name,
                    values.len(),
                    first.len()
                )));
            }
        }
        self.names.push(name);
        self.columns.push(values);
        Ok(self)
    }

    /// read a headed csv where every cell parses as a number (`true`/`false` accepted as 1/0)
    pub fn from_csv_reader<R: Read>(reader: R) -> Result<Self> {
        let mut rdr = csv::ReaderBuilder::new().trim(csv::Trim::All).from_reader(reader);
        let names: Vec<String> = rdr.headers()?.iter().map(str::to_string).collect();
        let mut columns: Vec<Vec<f64>> = vec![Vec::new(); names.len()];

        for (row, record) in rdr.records().enumerate() {
            let record = record?;
            for (col, cell) in record.iter().enumerate() {
                let value = parse_cell(cell).ok_or_else(|| {
                    SurvivalError::invalid_input(format!(
                        "row {} column '{}': '{}' is not numeric",
                        row + 1,
                        names[col],
                        cell
                    ))
                })?;
                columns[col].push(value);
            }
        }

        let mut table = Table::new();
        for (name, values) in names.into_iter().zip(columns) {
            table = table.with_column(name, values)?;
        }
        Ok(table)
    }

    pub fn n_rows(&self) -> usize {
        self.columns.first().map_or(0, Vec::len)
    }

    pub fn column_names(&self) -> &[String] {
        &self.names
    }

    pub fn column(&self, name: &str) -> Result<&[f64]> {
        self.names
            .iter()
            .position(|n| n == name)
            .map(|i| self.columns[i].as_slice())
            .ok_or_else(|| SurvivalError::invalid_input(format!("no column named '{}'", name)))
    }

    /// pull the named columns into an `n_rows x names.len()` matrix
    pub fn matrix(&self, names: &[String]) -> Result<Array2<f64>> {
        let n = self.n_rows();
        let mut out = Array2::zeros((n, names.len()));
        for (j, name) in names.iter().enumerate() {
            let col = self.column(name)?;
            for (i, &v) in col.iter().enumerate() {
                out[[i, j]] = v;
            }
        }
        Ok(out)
    }
}

impl Default for Table {
    fn default() -> Self {
        Self::new()
    }
}

fn parse_cell(cell: &str) -> Option<f64> {
    match cell {
        "true" | "TRUE" | "True" => Some(1.0),
        "false" | "FALSE" | "False" => Some(0.0),
        _ => cell.parse::<f64>().ok(),
    }
}

/// which covariates enter the model
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Covariates {
    Named(Vec<String>),
    /// `~ .` - every column except time and status
    AllOthers,
}

/// survival outcome plus covariate list
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Formula {
    pub time: String,
    pub status: String,
    pub covariates: Covariates,
}

impl Formula {
    pub fn new(time: impl Into<String>, status: impl Into<String>, covariates: Vec<String>) -> Self {
        Self {
            time: time.into(),
            status: status.into(),
            covariates: Covariates::Named(covariates),
        }
    }

    pub fn parse(text: &str) -> Result<Self> {
        let (lhs, rhs) = text.split_once('~').ok_or_else(|| {
            SurvivalError::invalid_input(format!("formula '{}' has no '~'", text))
        })?;

        let lhs = lhs.trim();
        let inner = lhs
            .strip_prefix("Surv(")
            .and_then(|s| s.strip_suffix(')'))
            .ok_or_else(|| {
                SurvivalError::invalid_input(format!(
                    "left side '{}' must look like Surv(time, status)",
                    lhs
                ))
            })?;
        let outcome: Vec<&str> = inner.split(',').map(str::trim).collect();
        if outcome.len() != 2 || outcome.iter().any(|s| s.is_empty()) {
            return Err(SurvivalError::invalid_input(format!(
                "Surv() needs exactly two columns, got '{}'",
                inner
            )));
        }

        let rhs = rhs.trim();
        let covariates = match rhs {
            "." => Covariates::AllOthers,
            "1" => Covariates::Named(Vec::new()),
            _ => {
                let terms: Vec<String> = rhs.split('+').map(|s| s.trim().to_string()).collect();
                if terms.iter().any(String::is_empty) {
                    return Err(SurvivalError::invalid_input(format!(
                        "empty term in '{}'",
                        rhs
                    )));
                }
                Covariates::Named(terms)
            }
        };

        Ok(Self {
            time: outcome[0].to_string(),
            status: outcome[1].to_string(),
            covariates,
        })
    }

    /// resolve the covariate columns against a table
    pub fn covariate_names(&self, table: &Table) -> Result<Vec<String>> {
        match &self.covariates {
            Covariates::Named(names) => {
                for name in names {
                    table.column(name)?;
                }
                Ok(names.clone())
            }
            Covariates::AllOthers => Ok(table
                .column_names()
                .iter()
                .filter(|n| **n != self.time && **n != self.status)
                .cloned()
                .collect()),
        }
    }
}

impl FromStr for Formula {
    type Err = SurvivalError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl fmt::Display for Formula {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rhs = match &self.covariates {
            Covariates::AllOthers => ".".to_string(),
            Covariates::Named(names) if names.is_empty() => "1".to_string(),
            Covariates::Named(names) => names.join(" + "),
        };
        write!(f, "Surv({}, {}) ~ {}", self.time, self.status, rhs)
    }
}

impl SurvivalData {
    /// build a cohort from a table using the formula to pick columns
    pub fn from_table(table: &Table, formula: &Formula) -> Result<Self> {
        let times = table.column(&formula.time)?.to_vec();
        let status = table.column(&formula.status)?;

        let events = status
            .iter()
            .enumerate()
            .map(|(i, &s)| match s {
                s if s == 1.0 => Ok(true),
                s if s == 0.0 => Ok(false),
                other => Err(SurvivalError::invalid_input(format!(
                    "status at row {} is {} - expected 0 or 1",
                    i + 1,
                    other
                ))),
            })
            .collect::<Result<Vec<bool>>>()?;

        let names = formula.covariate_names(table)?;
        let covariates = table.matrix(&names)?;

        SurvivalData::new(times, events, covariates)?.with_feature_names(names)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CSV: &str = "time,status,age,treated\n\
                       5.0,1,61,0\n\
                       8.5,0,55,1\n\
                       3.2,1,70,true\n";

    #[test]
    fn test_parse_formula() {
        let f = Formula::parse("Surv(time, status) ~ age + treated").unwrap();
        assert_eq!(f.time, "time");
        assert_eq!(f.status, "status");
        assert_eq!(
            f.covariates,
            Covariates::Named(vec!["age".to_string(), "treated".to_string()])
        );
        assert_eq!(f.to_string(), "Surv(time, status) ~ age + treated");
    }

    #[test]
    fn test_parse_dot_and_intercept() {
        let all: Formula = "Surv(t,e) ~ .".parse().unwrap();
        assert_eq!(all.covariates, Covariates::AllOthers);

        let none = Formula::parse("Surv(t, e) ~ 1").unwrap();
        assert_eq!(none.covariates, Covariates::Named(vec![]));
    }

    #[test]
    fn test_parse_rejects_malformed() {
        assert!(Formula::parse("time ~ age").is_err());
        assert!(Formula::parse("Surv(time) ~ age").is_err());
        assert!(Formula::parse("Surv(time, status) age").is_err());
        assert!(Formula::parse("Surv(time, status) ~ age + ").is_err());
    }

    #[test]
    fn test_table_from_csv() {
        let table = Table::from_csv_reader(CSV.as_bytes()).unwrap();
        assert_eq!(table.n_rows(), 3);
        assert_eq!(table.column("treated").unwrap(), &[0.0, 1.0, 1.0]);
        assert!(table.column("weight").is_err());
    }

    #[test]
    fn test_csv_non_numeric_cell() {
        let bad = "time,status,arm\n1.0,1,control\n";
        assert!(matches!(
            Table::from_csv_reader(bad.as_bytes()),
            Err(SurvivalError::InvalidInput { .. })
        ));
    }

    #[test]
    fn test_cohort_from_table() {
        let table = Table::from_csv_reader(CSV.as_bytes()).unwrap();
        let data =
            SurvivalData::from_table(&table, &Formula::parse("Surv(time, status) ~ .").unwrap())
                .unwrap();
        assert_eq!(data.n_samples(), 3);
        assert_eq!(data.n_features(), 2);
        assert_eq!(data.events(), &[true, false, true]);
        assert_eq!(data.feature_names().unwrap(), &["age", "treated"]);
        assert_eq!(data.covariates()[[2, 0]], 70.0);
    }

    #[test]
    fn test_cohort_rejects_bad_status() {
        let table = Table::new()
            .with_column("time", vec![1.0, 2.0])
            .unwrap()
            .with_column("status", vec![1.0, 2.0])
            .unwrap();
        let formula = Formula::new("time", "status", vec![]);
        assert!(SurvivalData::from_table(&table, &formula).is_err());
    }

    #[test]
    fn test_table_column_length_checked() {
        let res = Table::new()
            .with_column("a", vec![1.0, 2.0])
            .unwrap()
            .with_column("b", vec![1.0]);
        assert!(matches!(res, Err(SurvivalError::InvalidDimensions { .. })));
    }
}
