use serde::{Serialize, Deserialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum Direct {
    #[default]
    In,
    Out,
    Local,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum DataType {
    #[default]
    Varchar,
    Integer,
    Long,
    Float,
    Double,
    Date,
    Time,
    Timestamp,
    Boolean,
    List,
    File,
}

/// A named variable in a var pool or a parameter list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Property {
    pub prop: String,
    #[serde(default)]
    pub direct: Direct,
    #[serde(rename = "type", default)]
    pub data_type: DataType,
    #[serde(default)]
    pub value: String,
}

impl Property {
    pub fn new(prop: impl Into<String>, direct: Direct, value: impl Into<String>) -> Self {
        Self {
            prop: prop.into(),
            direct,
            data_type: DataType::Varchar,
            value: value.into(),
        }
    }

    pub fn output(prop: impl Into<String>, value: impl Into<String>) -> Self {
        Self::new(prop, Direct::Out, value)
    }

    pub fn with_type(mut self, data_type: DataType) -> Self {
        self.data_type = data_type;
        self
    }
}
