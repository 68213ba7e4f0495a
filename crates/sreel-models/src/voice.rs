//! The static voice catalog.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::analysis::{AgeStage, Gender};

/// One entry in the voice catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct VoiceSpec {
    pub id: String,
    pub gender: Gender,
    pub age_stage: AgeStage,
}

impl VoiceSpec {
    fn new(id: &str, gender: Gender, age_stage: AgeStage) -> Self {
        Self {
            id: id.to_string(),
            gender,
            age_stage,
        }
    }
}

/// The builtin catalog: 28 voices spanning {male,female} x
/// {child,youth,adult,elder,unknown}.
pub fn builtin_catalog() -> Vec<VoiceSpec> {
    use AgeStage::*;
    use Gender::*;

    vec![
        VoiceSpec::new("m_child_01", Male, Child),
        VoiceSpec::new("m_child_02", Male, Child),
        VoiceSpec::new("m_youth_01", Male, Youth),
        VoiceSpec::new("m_youth_02", Male, Youth),
        VoiceSpec::new("m_youth_03", Male, Youth),
        VoiceSpec::new("m_adult_01", Male, Adult),
        VoiceSpec::new("m_adult_02", Male, Adult),
        VoiceSpec::new("m_adult_03", Male, Adult),
        VoiceSpec::new("m_adult_04", Male, Adult),
        VoiceSpec::new("m_elder_01", Male, Elder),
        VoiceSpec::new("m_elder_02", Male, Elder),
        VoiceSpec::new("m_any_01", Male, AgeStage::Unknown),
        VoiceSpec::new("m_any_02", Male, AgeStage::Unknown),
        VoiceSpec::new("m_any_03", Male, AgeStage::Unknown),
        VoiceSpec::new("f_child_01", Female, Child),
        VoiceSpec::new("f_child_02", Female, Child),
        VoiceSpec::new("f_youth_01", Female, Youth),
        VoiceSpec::new("f_youth_02", Female, Youth),
        VoiceSpec::new("f_youth_03", Female, Youth),
        VoiceSpec::new("f_adult_01", Female, Adult),
        VoiceSpec::new("f_adult_02", Female, Adult),
        VoiceSpec::new("f_adult_03", Female, Adult),
        VoiceSpec::new("f_adult_04", Female, Adult),
        VoiceSpec::new("f_elder_01", Female, Elder),
        VoiceSpec::new("f_elder_02", Female, Elder),
        VoiceSpec::new("f_any_01", Female, AgeStage::Unknown),
        VoiceSpec::new("f_any_02", Female, AgeStage::Unknown),
        VoiceSpec::new("f_any_03", Female, AgeStage::Unknown),
    ]
}
