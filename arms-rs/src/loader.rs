//! Reader for the simulator's survey output.
//!
//! Each line is `surveyIndex\tgroupCode\tmeasureCode\tvalue` with no header.
//! Any malformed line fails the whole load; a truncated series is never
//! returned.

use std::collections::HashSet;
use std::fs::File;
use std::io::Read;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// One line of simulator output.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SimulationRecord {
    pub survey_index: u32,
    pub group_code: i64,
    pub measure_code: i64,
    pub value: f64,
}

pub fn load_output(path: &Path) -> Result<Vec<SimulationRecord>> {
    let file = File::open(path).map_err(|e| Error::io(path, e))?;
    let records = parse_output(file)?;
    tracing::debug!(path = %path.display(), records = records.len(), "loaded simulator output");
    Ok(records)
}

pub fn parse_output<R: Read>(reader: R) -> Result<Vec<SimulationRecord>> {
    let mut rdr = csv::ReaderBuilder::new()
        .delimiter(b'\t')
        .has_headers(false)
        .flexible(true)
        .quoting(false)
        .from_reader(reader);

    let mut records = Vec::new();
    let mut seen = HashSet::new();
    let mut last_survey = 0;
    let mut row = csv::ByteRecord::new();

    loop {
        let more = rdr.read_byte_record(&mut row).map_err(|e| {
            let line_number = e.position().map(|p| p.line()).unwrap_or(0);
            Error::Parse {
                line_number,
                raw_line: String::new(),
                reason: e.to_string(),
            }
        })?;
        if !more {
            break;
        }
        let line_number = row.position().map(|p| p.line()).unwrap_or(0);
        let raw_line = row
            .iter()
            .map(String::from_utf8_lossy)
            .collect::<Vec<_>>()
            .join("\t");
        let fail = |reason: String| Error::Parse {
            line_number,
            raw_line: raw_line.clone(),
            reason,
        };

        if row.len() != 4 {
            return Err(fail(format!("expected 4 fields, found {}", row.len())));
        }
        let survey_index: u32 = parse_field(&row[0], "survey index").map_err(&fail)?;
        let group_code: i64 = parse_field(&row[1], "group code").map_err(&fail)?;
        let measure_code: i64 = parse_field(&row[2], "measure code").map_err(&fail)?;
        let value: f64 = parse_field(&row[3], "value").map_err(&fail)?;

        if survey_index < 1 {
            return Err(fail("survey index must be at least 1".to_string()));
        }
        if !value.is_finite() || value < 0.0 {
            return Err(fail(format!("value {value} is not a finite non-negative number")));
        }
        if survey_index < last_survey {
            return Err(fail(format!(
                "survey index went backwards from {last_survey} to {survey_index}"
            )));
        }
        if !seen.insert((survey_index, group_code, measure_code)) {
            return Err(fail(format!(
                "duplicate entry for survey {survey_index}, group {group_code}, measure {measure_code}"
            )));
        }
        last_survey = survey_index;

        records.push(SimulationRecord {
            survey_index,
            group_code,
            measure_code,
            value,
        });
    }
    Ok(records)
}

fn parse_field<T: std::str::FromStr>(raw: &[u8], name: &str) -> std::result::Result<T, String>
where
    T::Err: std::fmt::Display,
{
    let text = std::str::from_utf8(raw).map_err(|e| format!("{name} is not valid UTF-8: {e}"))?;
    text.parse::<T>()
        .map_err(|e| format!("invalid {name} `{text}`: {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_parse_preserves_file_order() {
        let raw = "1\t0\t0\t2000\n1\t0\t14\t0\n2\t0\t0\t2000\n2\t0\t14\t120.0\n";
        let records = parse_output(raw.as_bytes()).unwrap();
        assert_eq!(records.len(), 4);
        assert_eq!(
            records[3],
            SimulationRecord {
                survey_index: 2,
                group_code: 0,
                measure_code: 14,
                value: 120.0
            }
        );
        let order: Vec<_> = records.iter().map(|r| (r.survey_index, r.measure_code)).collect();
        assert_eq!(order, vec![(1, 0), (1, 14), (2, 0), (2, 14)]);
    }

    #[test]
    fn test_non_numeric_field_fails_whole_load() {
        let raw = "1\t0\t14\t5.0\n2\t0\tfoo\t10.0\n3\t0\t14\t7.0\n";
        match parse_output(raw.as_bytes()) {
            Err(Error::Parse {
                line_number,
                raw_line,
                reason,
            }) => {
                assert_eq!(line_number, 2);
                assert_eq!(raw_line, "2\t0\tfoo\t10.0");
                assert!(reason.contains("measure code"));
            }
            other => panic!("expected parse error, got {other:?}"),
        }
    }

    #[test]
    fn test_invalid_utf8_keeps_line() {
        let raw = b"2\t0\t14\t1.0\n3\t0\t14\t\xff\xfe\n";
        match parse_output(&raw[..]) {
            Err(Error::Parse {
                line_number,
                raw_line,
                reason,
            }) => {
                assert_eq!(line_number, 2);
                assert_eq!(raw_line, "3\t0\t14\t\u{fffd}\u{fffd}");
                assert!(reason.contains("UTF-8"));
            }
            other => panic!("expected parse error, got {other:?}"),
        }
    }

    #[test]
    fn test_wrong_field_count() {
        let raw = "1\t0\t14\t5.0\n2\t0\t14\n";
        let err = parse_output(raw.as_bytes()).unwrap_err();
        assert!(matches!(err, Error::Parse { line_number: 2, .. }));

        let raw = "1\t0\t14\t5.0\t9\n";
        let err = parse_output(raw.as_bytes()).unwrap_err();
        assert!(matches!(err, Error::Parse { line_number: 1, .. }));
    }

    #[test]
    fn test_rejects_invalid_values() {
        for raw in [
            "0\t0\t14\t1.0\n",
            "-1\t0\t14\t1.0\n",
            "1\t0\t14\t-3.0\n",
            "1\t0\t14\tNaN\n",
            "1\t0\t14\tinf\n",
            "2\t0\t14\t1.0\n1\t0\t14\t1.0\n",
            "2\t0\t14\t1.0\n2\t0\t14\t1.0\n",
        ] {
            assert!(
                matches!(parse_output(raw.as_bytes()), Err(Error::Parse { .. })),
                "accepted {raw:?}"
            );
        }
    }

    #[test]
    fn test_crlf_and_empty_input() {
        let records = parse_output("1\t0\t0\t10\r\n2\t0\t0\t11\r\n".as_bytes()).unwrap();
        assert_eq!(records.len(), 2);
        assert!(parse_output("".as_bytes()).unwrap().is_empty());
    }

    #[test]
    fn test_load_output_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "2\t0\t14\t120.0\n3\t0\t14\t150.0\n").unwrap();
        let records = load_output(file.path()).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[1].value, 150.0);
    }

    #[test]
    fn test_load_missing_file_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = load_output(&dir.path().join("absent.txt")).unwrap_err();
        assert!(matches!(err, Error::Io { .. }));
    }
}
