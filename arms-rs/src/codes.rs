use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{CodeKind, Error, Result};

/// Reported quantities understood by the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Measure {
    #[serde(rename = "nHost")]
    Hosts,
    #[serde(rename = "nInfect")]
    Infected,
    #[serde(rename = "nPatent")]
    Patent,
    #[serde(rename = "nUncomp")]
    UncomplicatedCases,
    #[serde(rename = "nSevere")]
    SevereCases,
    #[serde(rename = "inputEIR")]
    InputEir,
    #[serde(rename = "simulatedEIR")]
    SimulatedEir,
}

impl Measure {
    pub const ALL: [Measure; 7] = [
        Measure::Hosts,
        Measure::Infected,
        Measure::Patent,
        Measure::UncomplicatedCases,
        Measure::SevereCases,
        Measure::InputEir,
        Measure::SimulatedEir,
    ];

    pub fn label(self) -> &'static str {
        match self {
            Measure::Hosts => "nHost",
            Measure::Infected => "nInfect",
            Measure::Patent => "nPatent",
            Measure::UncomplicatedCases => "nUncomp",
            Measure::SevereCases => "nSevere",
            Measure::InputEir => "inputEIR",
            Measure::SimulatedEir => "simulatedEIR",
        }
    }
}

impl fmt::Display for Measure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Population subsets a measure can be reported over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum AgeGroup {
    #[serde(rename = "All")]
    All,
    #[serde(rename = "0-1 years")]
    Years0To1,
    #[serde(rename = "1-2 years")]
    Years1To2,
    #[serde(rename = "2-5 years")]
    Years2To5,
    #[serde(rename = "5-10 years")]
    Years5To10,
    #[serde(rename = "10-15 years")]
    Years10To15,
    #[serde(rename = "15-20 years")]
    Years15To20,
    #[serde(rename = "20-100 years")]
    Years20To100,
}

impl AgeGroup {
    pub const ALL: [AgeGroup; 8] = [
        AgeGroup::All,
        AgeGroup::Years0To1,
        AgeGroup::Years1To2,
        AgeGroup::Years2To5,
        AgeGroup::Years5To10,
        AgeGroup::Years10To15,
        AgeGroup::Years15To20,
        AgeGroup::Years20To100,
    ];

    pub fn label(self) -> &'static str {
        match self {
            AgeGroup::All => "All",
            AgeGroup::Years0To1 => "0-1 years",
            AgeGroup::Years1To2 => "1-2 years",
            AgeGroup::Years2To5 => "2-5 years",
            AgeGroup::Years5To10 => "5-10 years",
            AgeGroup::Years10To15 => "10-15 years",
            AgeGroup::Years15To20 => "15-20 years",
            AgeGroup::Years20To100 => "20-100 years",
        }
    }
}

impl fmt::Display for AgeGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MeasureCode {
    pub code: i64,
    pub measure: Measure,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupCode {
    pub code: i64,
    pub group: AgeGroup,
}

/// Serialized form of a [`CodeTable`], as it appears in configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CodeTableDef {
    pub version: String,
    pub measures: Vec<MeasureCode>,
    pub groups: Vec<GroupCode>,
}

/// Versioned, one-to-one mapping between the simulator's integer codes and
/// the semantic enumerations. Codes outside the table are rejected.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "CodeTableDef", into = "CodeTableDef")]
pub struct CodeTable {
    version: String,
    measures: BTreeMap<i64, Measure>,
    groups: BTreeMap<i64, AgeGroup>,
    measure_codes: BTreeMap<Measure, i64>,
    group_codes: BTreeMap<AgeGroup, i64>,
}

impl CodeTable {
    pub fn new(
        version: impl Into<String>,
        measures: impl IntoIterator<Item = (i64, Measure)>,
        groups: impl IntoIterator<Item = (i64, AgeGroup)>,
    ) -> Result<Self> {
        let version = version.into();
        let (measures, measure_codes) = invert("measure", measures)?;
        let (groups, group_codes) = invert("group", groups)?;
        Ok(Self {
            version,
            measures,
            groups,
            measure_codes,
            group_codes,
        })
    }

    /// Monitoring codes used by the OpenMalaria survey output, with the
    /// age-group partition of the workshop scenarios.
    pub fn openmalaria() -> Self {
        let measures = [
            (0, Measure::Hosts),
            (1, Measure::Infected),
            (3, Measure::Patent),
            (14, Measure::UncomplicatedCases),
            (15, Measure::SevereCases),
            (35, Measure::InputEir),
            (36, Measure::SimulatedEir),
        ];
        let groups = AgeGroup::ALL
            .iter()
            .enumerate()
            .map(|(code, group)| (code as i64, *group));
        // The literal tables above have no duplicates.
        match Self::new("openmalaria-1", measures, groups) {
            Ok(table) => table,
            Err(err) => unreachable!("built-in code table is invalid: {err}"),
        }
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn resolve_measure(&self, code: i64) -> Result<Measure> {
        self.measures
            .get(&code)
            .copied()
            .ok_or(Error::UnknownCode {
                code,
                kind: CodeKind::Measure,
            })
    }

    pub fn resolve_group(&self, code: i64) -> Result<AgeGroup> {
        self.groups.get(&code).copied().ok_or(Error::UnknownCode {
            code,
            kind: CodeKind::Group,
        })
    }

    pub fn measure_code(&self, measure: Measure) -> Option<i64> {
        self.measure_codes.get(&measure).copied()
    }

    pub fn group_code(&self, group: AgeGroup) -> Option<i64> {
        self.group_codes.get(&group).copied()
    }

    pub fn measures(&self) -> impl Iterator<Item = (i64, Measure)> + '_ {
        self.measures.iter().map(|(code, m)| (*code, *m))
    }

    pub fn groups(&self) -> impl Iterator<Item = (i64, AgeGroup)> + '_ {
        self.groups.iter().map(|(code, g)| (*code, *g))
    }
}

impl Default for CodeTable {
    fn default() -> Self {
        Self::openmalaria()
    }
}

impl TryFrom<CodeTableDef> for CodeTable {
    type Error = Error;

    fn try_from(def: CodeTableDef) -> Result<Self> {
        CodeTable::new(
            def.version,
            def.measures.into_iter().map(|m| (m.code, m.measure)),
            def.groups.into_iter().map(|g| (g.code, g.group)),
        )
    }
}

impl From<CodeTable> for CodeTableDef {
    fn from(table: CodeTable) -> Self {
        CodeTableDef {
            measures: table
                .measures()
                .map(|(code, measure)| MeasureCode { code, measure })
                .collect(),
            groups: table
                .groups()
                .map(|(code, group)| GroupCode { code, group })
                .collect(),
            version: table.version,
        }
    }
}

fn invert<L: Copy + Ord + fmt::Display>(
    kind: &str,
    entries: impl IntoIterator<Item = (i64, L)>,
) -> Result<(BTreeMap<i64, L>, BTreeMap<L, i64>)> {
    let mut by_code = BTreeMap::new();
    let mut by_label = BTreeMap::new();
    for (code, label) in entries {
        if by_code.insert(code, label).is_some() {
            return Err(Error::Config(format!("duplicate {kind} code {code}")));
        }
        if by_label.insert(label, code).is_some() {
            return Err(Error::Config(format!(
                "{kind} `{label}` is mapped to more than one code"
            )));
        }
    }
    Ok((by_code, by_label))
}
