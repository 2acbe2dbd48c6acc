//! Table entities

use logmeter_shared::ConsumptionRecord;
use serde_json::{Map, Value};

use super::error::TableError;

pub const PARTITION_KEY: &str = "PartitionKey";
pub const ROW_KEY: &str = "RowKey";

/// One row of a table: keys plus typed property values
#[derive(Debug, Clone, PartialEq)]
pub struct TableEntity {
    pub partition_key: String,
    pub row_key: String,
    pub properties: Map<String, Value>,
}

impl TableEntity {
    pub fn new(partition_key: impl Into<String>, row_key: impl Into<String>) -> Self {
        Self {
            partition_key: partition_key.into(),
            row_key: row_key.into(),
            properties: Map::new(),
        }
    }

    pub fn with_property(mut self, name: &str, value: impl Into<Value>) -> Self {
        self.properties.insert(name.to_string(), value.into());
        self
    }

    /// Consumption entity for one `(website, hour)`; the website id is the
    /// partition key.
    pub fn from_consumption(record: &ConsumptionRecord, row_key: impl Into<String>) -> Self {
        Self::new(record.website_id.to_string(), row_key)
            .with_property("Time", record.hour.timestamp())
            .with_property("Files", record.files)
            .with_property("FilesCount", record.files_count)
            .with_property("Dynamic", record.dynamic)
            .with_property("DynamicCount", record.dynamic_count)
            .with_property("Other", record.other)
            .with_property("OtherCount", record.other_count)
    }

    /// JSON object with the properties and both keys.
    pub fn to_value(&self) -> Value {
        let mut object = self.properties.clone();
        object.insert(
            PARTITION_KEY.to_string(),
            Value::String(self.partition_key.clone()),
        );
        object.insert(ROW_KEY.to_string(), Value::String(self.row_key.clone()));
        Value::Object(object)
    }

    pub fn to_json(&self) -> Result<String, TableError> {
        Ok(serde_json::to_string(&self.to_value())?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    #[test]
    fn test_consumption_entity_json() {
        let record = ConsumptionRecord {
            website_id: 42,
            hour: Utc.with_ymd_and_hms(2016, 7, 31, 18, 0, 0).unwrap(),
            files: 1,
            files_count: 2,
            dynamic: 32327,
            dynamic_count: 1,
            other: 0,
            other_count: 0,
        };
        let entity = TableEntity::from_consumption(&record, "1469988000-web1:22-1469991600");
        assert_eq!(entity.partition_key, "42");

        let json: Value = serde_json::from_str(&entity.to_json().unwrap()).unwrap();
        assert_eq!(json["PartitionKey"], "42");
        assert_eq!(json["RowKey"], "1469988000-web1:22-1469991600");
        assert_eq!(json["Time"], 1469988000);
        assert_eq!(json["Dynamic"], 32327);
        assert_eq!(json["FilesCount"], 2);
        assert_eq!(json.as_object().unwrap().len(), 9);
    }
}
