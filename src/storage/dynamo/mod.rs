//! DynamoDB store client.
//!
//! Table schema (names configurable):
//! - `PK`: aggregate id (String)
//! - `SK`: version (Number), `0` reserved for the snapshot
//! - `P`: commit events as a List of Binary, or snapshot blob as Binary
//! - `V`: snapshot version (Number)
//!
//! Commit payloads use an ordered List rather than a Binary Set: sets lose
//! write order and collapse identical events.

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use aws_sdk_dynamodb::error::DisplayErrorContext;
use aws_sdk_dynamodb::primitives::Blob;
use aws_sdk_dynamodb::types::{AttributeValue as DynamoValue, ReturnConsumedCapacity};
use aws_sdk_dynamodb::Client;
use bytes::Bytes;
use tracing::{debug, info};

use super::{
    AttributeValue, Consistency, Item, ItemKey, PutOutcome, Precondition, QueryPage, Result,
    StoreClient, StoreError, StoredItem, TableSchema,
};
use crate::config::DynamoConfig;


type DynamoItem = HashMap<String, DynamoValue>;

/// DynamoDB implementation of StoreClient.
#[derive(Clone)]
pub struct DynamoStoreClient {
    client: Client,
}

impl DynamoStoreClient {
    /// Wrap an existing SDK client.
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Build a client from the ambient AWS configuration.
    ///
    /// `endpoint_url` points the client at DynamoDB Local or LocalStack.
    pub async fn connect(config: &DynamoConfig) -> Self {
        let mut loader = aws_config::defaults(aws_config::BehaviorVersion::latest());
        if let Some(region) = &config.region {
            loader = loader.region(aws_config::Region::new(region.clone()));
        }
        let sdk_config = loader.load().await;

        let mut builder = aws_sdk_dynamodb::config::Builder::from(&sdk_config);
        if let Some(endpoint) = &config.endpoint_url {
            builder = builder.endpoint_url(endpoint);
        }

        info!(
            endpoint = config.endpoint_url.as_deref().unwrap_or("default"),
            "Connected to DynamoDB"
        );

        Self::new(Client::from_conf(builder.build()))
    }

    /// The underlying SDK client.
    pub fn client(&self) -> &Client {
        &self.client
    }
}

fn key_map(table: TableSchema<'_>, key: &ItemKey) -> DynamoItem {
    HashMap::from([
        (
            table.partition_key.to_string(),
            DynamoValue::S(key.partition.clone()),
        ),
        (
            table.sort_key.to_string(),
            DynamoValue::N(key.sort.to_string()),
        ),
    ])
}

fn to_dynamo_value(value: &AttributeValue) -> DynamoValue {
    match value {
        AttributeValue::Binary(b) => DynamoValue::B(Blob::new(b.to_vec())),
        AttributeValue::BinaryList(list) => DynamoValue::L(
            list.iter()
                .map(|b| DynamoValue::B(Blob::new(b.to_vec())))
                .collect(),
        ),
        AttributeValue::Number(n) => DynamoValue::N(n.to_string()),
    }
}

fn parse_number(name: &str, raw: &str) -> Result<u64> {
    raw.parse::<u64>().map_err(|e| {
        StoreError::Malformed(format!("attribute {name} is not a version number: {e}"))
    })
}

/// Convert a stored attribute. Returns `None` for shapes this store never writes.
fn from_dynamo_value(name: &str, value: DynamoValue) -> Result<Option<AttributeValue>> {
    let converted = match value {
        DynamoValue::B(blob) => AttributeValue::Binary(Bytes::from(blob.into_inner())),
        DynamoValue::L(list) => {
            let mut events = Vec::with_capacity(list.len());
            for element in list {
                match element {
                    DynamoValue::B(blob) => events.push(Bytes::from(blob.into_inner())),
                    _ => {
                        return Err(StoreError::Malformed(format!(
                            "attribute {name} holds a non-binary list element"
                        )))
                    }
                }
            }
            AttributeValue::BinaryList(events)
        }
        DynamoValue::N(raw) => AttributeValue::Number(parse_number(name, &raw)?),
        _ => return Ok(None),
    };
    Ok(Some(converted))
}

fn sort_key_of(table: TableSchema<'_>, item: &DynamoItem) -> Result<u64> {
    match item.get(table.sort_key) {
        Some(DynamoValue::N(raw)) => parse_number(table.sort_key, raw),
        _ => Err(StoreError::Malformed(format!(
            "item has no numeric sort key {}",
            table.sort_key
        ))),
    }
}

/// Strip key attributes and convert the rest.
fn from_dynamo_item(table: TableSchema<'_>, item: DynamoItem) -> Result<Item> {
    let mut attributes = Item::with_capacity(item.len());
    for (name, value) in item {
        if name == table.partition_key || name == table.sort_key {
            continue;
        }
        match from_dynamo_value(&name, value)? {
            Some(converted) => {
                attributes.insert(name, converted);
            }
            None => debug!(attribute = %name, "Ignoring attribute of unsupported type"),
        }
    }
    Ok(attributes)
}

/// Expressions for a conditional `UpdateItem`.
#[derive(Debug)]
struct UpdateExpression {
    update: String,
    condition: String,
    names: HashMap<String, String>,
    values: HashMap<String, DynamoValue>,
}

impl UpdateExpression {
    fn build(
        table: TableSchema<'_>,
        attributes: &Item,
        precondition: &Precondition,
    ) -> Result<Self> {
        if attributes.is_empty() {
            return Err(StoreError::Malformed(
                "conditional put requires at least one attribute".to_string(),
            ));
        }

        let mut names = HashMap::new();
        let mut values = HashMap::new();

        // Sorted for a stable expression text
        let sorted: BTreeMap<&String, &AttributeValue> = attributes.iter().collect();
        let mut assignments = Vec::with_capacity(sorted.len());
        for (index, (name, value)) in sorted.into_iter().enumerate() {
            let name_ref = format!("#a{index}");
            let value_ref = format!(":a{index}");
            assignments.push(format!("{name_ref} = {value_ref}"));
            names.insert(name_ref, name.clone());
            values.insert(value_ref, to_dynamo_value(value));
        }

        let condition = match precondition {
            Precondition::ItemAbsent => {
                names.insert("#pk".to_string(), table.partition_key.to_string());
                "attribute_not_exists(#pk)".to_string()
            }
            Precondition::AttributeAbsentOrBelow { attribute, value } => {
                names.insert("#c".to_string(), attribute.clone());
                values.insert(":c".to_string(), DynamoValue::N(value.to_string()));
                "attribute_not_exists(#c) OR #c < :c".to_string()
            }
        };

        Ok(Self {
            update: format!("SET {}", assignments.join(", ")),
            condition,
            names,
            values,
        })
    }
}

#[async_trait]
impl StoreClient for DynamoStoreClient {
    async fn get_item(
        &self,
        table: TableSchema<'_>,
        key: &ItemKey,
        consistency: Consistency,
    ) -> Result<Option<Item>> {
        let output = self
            .client
            .get_item()
            .table_name(table.table_name)
            .set_key(Some(key_map(table, key)))
            .consistent_read(consistency.is_strong())
            .send()
            .await
            .map_err(|e| StoreError::unavailable("GetItem", DisplayErrorContext(e)))?;

        output
            .item
            .map(|item| from_dynamo_item(table, item))
            .transpose()
    }

    async fn query(
        &self,
        table: TableSchema<'_>,
        partition: &str,
        exclusive_start: Option<u64>,
        consistency: Consistency,
    ) -> Result<QueryPage> {
        let mut request = self
            .client
            .query()
            .table_name(table.table_name)
            .consistent_read(consistency.is_strong())
            .key_condition_expression("#pk = :pk")
            .expression_attribute_names("#pk", table.partition_key)
            .expression_attribute_values(":pk", DynamoValue::S(partition.to_string()))
            .return_consumed_capacity(ReturnConsumedCapacity::Total);

        if let Some(sort) = exclusive_start {
            request = request.set_exclusive_start_key(Some(key_map(
                table,
                &ItemKey::new(partition, sort),
            )));
        }

        let output = request
            .send()
            .await
            .map_err(|e| StoreError::unavailable("Query", DisplayErrorContext(e)))?;

        let mut items = Vec::new();
        for item in output.items.unwrap_or_default() {
            let sort_key = sort_key_of(table, &item)?;
            items.push(StoredItem {
                sort_key,
                attributes: from_dynamo_item(table, item)?,
            });
        }

        let last_evaluated = output
            .last_evaluated_key
            .map(|key| sort_key_of(table, &key))
            .transpose()?;
        let consumed_capacity = output
            .consumed_capacity
            .and_then(|c| c.capacity_units)
            .unwrap_or_default();

        debug!(
            table = %table.table_name,
            partition = %partition,
            items = items.len(),
            consumed_capacity,
            "Queried DynamoDB page"
        );

        Ok(QueryPage {
            items,
            last_evaluated,
            consumed_capacity,
        })
    }

    async fn conditional_put(
        &self,
        table: TableSchema<'_>,
        key: &ItemKey,
        attributes: Item,
        precondition: Precondition,
    ) -> Result<PutOutcome> {
        let expression = UpdateExpression::build(table, &attributes, &precondition)?;

        let result = self
            .client
            .update_item()
            .table_name(table.table_name)
            .set_key(Some(key_map(table, key)))
            .update_expression(expression.update)
            .condition_expression(expression.condition)
            .set_expression_attribute_names(Some(expression.names))
            .set_expression_attribute_values(Some(expression.values))
            .send()
            .await;

        match result {
            Ok(_) => Ok(PutOutcome::Written),
            Err(err) => {
                let err = err.into_service_error();
                if err.is_conditional_check_failed_exception() {
                    Ok(PutOutcome::PreconditionFailed)
                } else {
                    Err(StoreError::unavailable(
                        "UpdateItem",
                        DisplayErrorContext(err),
                    ))
                }
            }
        }
    }
}
