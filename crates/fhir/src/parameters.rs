use crate::Resource;
use serde::{Deserialize, Serialize};

/// Operation input/output envelope. Only resource-valued parameters are modelled.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
pub struct Parameters {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub parameter: Vec<ParametersParameter>,
}

impl Parameters {
    /// The resource carried by the first parameter, if any.
    pub fn first_resource(&self) -> Option<&Resource> {
        self.parameter.first().and_then(|p| p.resource.as_deref())
    }

    pub fn into_first_resource(self) -> Option<Resource> {
        self.parameter
            .into_iter()
            .next()
            .and_then(|p| p.resource.map(|r| *r))
    }
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
pub struct ParametersParameter {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource: Option<Box<Resource>>,
}
