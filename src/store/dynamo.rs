//! DynamoDB-backed [`Store`] implementation.
//!
//! Thin adapter: translates the store-agnostic [`Condition`]/[`UpdateOp`]
//! ASTs and [`Value`] wire type into `aws-sdk-dynamodb` calls and back. No
//! domain logic (field tracking, key encoding, retry policy) lives here —
//! that is all in `crate::tx`/`crate::batch`/`crate::field`.

use super::{
    Condition, ItemKey, Page, QueryParams, ScanParams, Store, StoreError, StoreErrorCode,
    StoreItem, TableDescription, TableSpec, UpdateOp, WriteOp,
};
use crate::value::Value;
use async_trait::async_trait;
use aws_sdk_dynamodb::error::SdkError;
use aws_sdk_dynamodb::types::{
    AttributeValue, Delete, Put, TransactWriteItem, Update as DynamoUpdate,
};
use aws_sdk_dynamodb::Client;
use std::collections::BTreeMap;

/// DynamoDB storage backend.
///
/// All task/entity records for one `occdb` deployment live in a single
/// table keyed by `_id` (partition) and optional `_sk` (sort), per
/// `spec.md` §1.
#[derive(Clone)]
pub struct DynamoStore {
    client: Client,
}

impl DynamoStore {
    #[must_use]
    pub const fn new(client: Client) -> Self {
        Self { client }
    }

    /// Builds a client from the standard AWS SDK config chain (environment
    /// variables, shared profile, or IMDS).
    pub async fn from_env() -> Self {
        let config = aws_config::load_defaults(aws_config::BehaviorVersion::latest()).await;
        Self::new(Client::new(&config))
    }

    fn key_av(key: &ItemKey) -> BTreeMap<String, AttributeValue> {
        let mut map = BTreeMap::new();
        map.insert("_id".to_owned(), AttributeValue::S(key.partition.clone()));
        if let Some(sort) = &key.sort {
            map.insert("_sk".to_owned(), AttributeValue::S(sort.clone()));
        }
        map
    }
}

/// Converts our storage-agnostic [`Value`] to DynamoDB's `AttributeValue`.
fn to_av(value: &Value) -> AttributeValue {
    match value {
        Value::Null => AttributeValue::Null(true),
        Value::Bool(b) => AttributeValue::Bool(*b),
        Value::S(s) => AttributeValue::S(s.clone()),
        Value::N(n) => AttributeValue::N(n.to_string()),
        Value::B(b) => AttributeValue::B(b.clone().into()),
        Value::Ss(items) => AttributeValue::Ss(items.clone()),
        Value::Ns(items) => AttributeValue::Ns(items.iter().map(ToString::to_string).collect()),
        Value::Bs(items) => AttributeValue::Bs(items.iter().cloned().map(Into::into).collect()),
        Value::L(items) => AttributeValue::L(items.iter().map(to_av).collect()),
        Value::M(map) => {
            AttributeValue::M(map.iter().map(|(k, v)| (k.clone(), to_av(v))).collect())
        }
    }
}

/// Converts a DynamoDB `AttributeValue` back to our storage-agnostic
/// [`Value`]. Malformed numeric payloads are treated as corruption and
/// surfaced as `ValidationError` rather than panicking.
fn from_av(av: &AttributeValue) -> Result<Value, StoreError> {
    let bad_number = || {
        StoreError::new(
            StoreErrorCode::ValidationError,
            "attribute value carried a malformed number",
        )
    };
    Ok(match av {
        AttributeValue::Null(_) => Value::Null,
        AttributeValue::Bool(b) => Value::Bool(*b),
        AttributeValue::S(s) => Value::S(s.clone()),
        AttributeValue::N(n) => Value::N(crate::value::parse_number(n).map_err(|_| bad_number())?),
        AttributeValue::B(b) => Value::B(b.clone().into_inner()),
        AttributeValue::Ss(items) => Value::Ss(items.clone()),
        AttributeValue::Ns(items) => Value::Ns(
            items
                .iter()
                .map(|n| crate::value::parse_number(n).map_err(|_| bad_number()))
                .collect::<Result<_, _>>()?,
        ),
        AttributeValue::Bs(items) => {
            Value::Bs(items.iter().map(|b| b.clone().into_inner()).collect())
        }
        AttributeValue::L(items) => {
            Value::L(items.iter().map(from_av).collect::<Result<_, _>>()?)
        }
        AttributeValue::M(map) => Value::M(
            map.iter()
                .map(|(k, v)| Ok((k.clone(), from_av(v)?)))
                .collect::<Result<_, StoreError>>()?,
        ),
        other => {
            return Err(StoreError::new(
                StoreErrorCode::ValidationError,
                format!("unsupported DynamoDB attribute variant: {other:?}"),
            ))
        }
    })
}

fn item_to_av(item: &StoreItem) -> BTreeMap<String, AttributeValue> {
    item.iter().map(|(k, v)| (k.clone(), to_av(v))).collect()
}

fn item_from_av(
    map: BTreeMap<String, AttributeValue>,
) -> Result<StoreItem, StoreError> {
    map.into_iter()
        .map(|(k, v)| Ok((k, from_av(&v)?)))
        .collect()
}

/// Builds a DynamoDB `ConditionExpression` string plus its attribute-name
/// and attribute-value placeholder maps. Names and values are both
/// generated to avoid collisions with DynamoDB reserved words.
struct ExpressionBuilder {
    names: BTreeMap<String, String>,
    values: BTreeMap<String, AttributeValue>,
    next_name: usize,
    next_value: usize,
}

impl ExpressionBuilder {
    fn new() -> Self {
        Self {
            names: BTreeMap::new(),
            values: BTreeMap::new(),
            next_name: 0,
            next_value: 0,
        }
    }

    fn name(&mut self, attr: &str) -> String {
        let placeholder = format!("#n{}", self.next_name);
        self.next_name += 1;
        self.names.insert(placeholder.clone(), attr.to_owned());
        placeholder
    }

    fn value(&mut self, value: &Value) -> String {
        let placeholder = format!(":v{}", self.next_value);
        self.next_value += 1;
        self.values.insert(placeholder.clone(), to_av(value));
        placeholder
    }

    fn condition(&mut self, condition: &Condition) -> String {
        match condition {
            Condition::AttributeExists(attr) => {
                format!("attribute_exists({})", self.name(attr))
            }
            Condition::AttributeNotExists(attr) => {
                format!("attribute_not_exists({})", self.name(attr))
            }
            Condition::Equals(attr, value) => {
                format!("{} = {}", self.name(attr), self.value(value))
            }
            Condition::LessThan(attr, value) => {
                format!("{} < {}", self.name(attr), self.value(value))
            }
            Condition::LessThanOrEqual(attr, value) => {
                format!("{} <= {}", self.name(attr), self.value(value))
            }
            Condition::GreaterThan(attr, value) => {
                format!("{} > {}", self.name(attr), self.value(value))
            }
            Condition::GreaterThanOrEqual(attr, value) => {
                format!("{} >= {}", self.name(attr), self.value(value))
            }
            Condition::Between(attr, lo, hi) => {
                let name = self.name(attr);
                format!("{name} BETWEEN {} AND {}", self.value(lo), self.value(hi))
            }
            Condition::BeginsWith(attr, prefix) => {
                format!("begins_with({}, {})", self.name(attr), self.value(prefix))
            }
            Condition::And(parts) => parts
                .iter()
                .map(|p| self.condition(p))
                .collect::<Vec<_>>()
                .join(" AND "),
            Condition::Or(parts) => format!(
                "({})",
                parts
                    .iter()
                    .map(|p| self.condition(p))
                    .collect::<Vec<_>>()
                    .join(" OR ")
            ),
        }
    }

    fn update_expression(&mut self, ops: &[UpdateOp]) -> String {
        let mut sets = Vec::new();
        let mut removes = Vec::new();
        for op in ops {
            match op {
                UpdateOp::Set(attr, value) => {
                    sets.push(format!("{} = {}", self.name(attr), self.value(value)));
                }
                UpdateOp::Increment(attr, delta) => {
                    let name = self.name(attr);
                    let delta_placeholder = self.value(delta);
                    sets.push(format!("{name} = {name} + {delta_placeholder}"));
                }
                UpdateOp::Remove(attr) => removes.push(self.name(attr)),
            }
        }
        let mut clauses = Vec::new();
        if !sets.is_empty() {
            clauses.push(format!("SET {}", sets.join(", ")));
        }
        if !removes.is_empty() {
            clauses.push(format!("REMOVE {}", removes.join(", ")));
        }
        clauses.join(" ")
    }
}

fn classify<E: std::fmt::Debug>(err: &SdkError<E>) -> (StoreErrorCode, bool) {
    if err.raw_response().is_some_and(|r| r.status().as_u16() >= 500) {
        return (StoreErrorCode::InternalServerError, true);
    }
    (StoreErrorCode::Other, false)
}

fn sdk_err<E: std::fmt::Debug>(err: SdkError<E>) -> StoreError {
    let (code, retryable) = classify(&err);
    StoreError {
        code,
        message: format!("{err:?}"),
        retryable,
        cancellation_reasons: None,
    }
}

#[async_trait]
impl Store for DynamoStore {
    async fn get(
        &self,
        table: &str,
        key: &ItemKey,
        strong: bool,
    ) -> Result<Option<StoreItem>, StoreError> {
        let output = self
            .client
            .get_item()
            .table_name(table)
            .set_key(Some(Self::key_av(key)))
            .consistent_read(strong)
            .send()
            .await
            .map_err(sdk_err)?;
        output.item.map(item_from_av).transpose()
    }

    async fn put(
        &self,
        table: &str,
        item: StoreItem,
        condition: Option<Condition>,
    ) -> Result<(), StoreError> {
        let mut builder = self.client.put_item().table_name(table);
        for (k, v) in item_to_av(&item) {
            builder = builder.item(k, v);
        }
        if let Some(condition) = condition {
            let mut expr = ExpressionBuilder::new();
            let cond_expr = expr.condition(&condition);
            builder = builder
                .condition_expression(cond_expr)
                .set_expression_attribute_names(Some(expr.names))
                .set_expression_attribute_values(Some(expr.values));
        }
        builder.send().await.map_err(sdk_err)?;
        Ok(())
    }

    async fn update(
        &self,
        table: &str,
        key: &ItemKey,
        ops: Vec<UpdateOp>,
        condition: Option<Condition>,
    ) -> Result<(), StoreError> {
        let mut expr = ExpressionBuilder::new();
        let update_expr = expr.update_expression(&ops);
        let cond_expr = condition.as_ref().map(|c| expr.condition(c));
        let mut builder = self
            .client
            .update_item()
            .table_name(table)
            .set_key(Some(Self::key_av(key)))
            .update_expression(update_expr)
            .set_expression_attribute_names(Some(expr.names))
            .set_expression_attribute_values(Some(expr.values));
        if let Some(cond_expr) = cond_expr {
            builder = builder.condition_expression(cond_expr);
        }
        builder.send().await.map_err(sdk_err)?;
        Ok(())
    }

    async fn delete(
        &self,
        table: &str,
        key: &ItemKey,
        condition: Option<Condition>,
    ) -> Result<(), StoreError> {
        let mut builder = self
            .client
            .delete_item()
            .table_name(table)
            .set_key(Some(Self::key_av(key)));
        if let Some(condition) = condition {
            let mut expr = ExpressionBuilder::new();
            let cond_expr = expr.condition(&condition);
            builder = builder
                .condition_expression(cond_expr)
                .set_expression_attribute_names(Some(expr.names))
                .set_expression_attribute_values(Some(expr.values));
        }
        builder.send().await.map_err(sdk_err)?;
        Ok(())
    }

    async fn batch_get(
        &self,
        table: &str,
        keys: &[ItemKey],
        strong: bool,
    ) -> Result<Vec<StoreItem>, StoreError> {
        use aws_sdk_dynamodb::types::KeysAndAttributes;

        let mut pending: Vec<BTreeMap<String, AttributeValue>> =
            keys.iter().map(Self::key_av).collect();
        let mut results = Vec::new();
        // spec.md §4.6: bounded backoff over UnprocessedKeys, hard cap 11 attempts.
        for attempt in 0..11 {
            if pending.is_empty() {
                break;
            }
            let keys_and_attrs = KeysAndAttributes::builder()
                .set_keys(Some(pending.clone()))
                .consistent_read(strong)
                .build()
                .map_err(|e| {
                    StoreError::new(StoreErrorCode::ValidationError, e.to_string())
                })?;
            let output = self
                .client
                .batch_get_item()
                .request_items(table, keys_and_attrs)
                .send()
                .await
                .map_err(sdk_err)?;
            if let Some(mut responses) = output.responses {
                if let Some(items) = responses.remove(table) {
                    for item in items {
                        results.push(item_from_av(item)?);
                    }
                }
            }
            pending = output
                .unprocessed_keys
                .and_then(|mut m| m.remove(table))
                .map(|k| k.keys)
                .unwrap_or_default();
            if !pending.is_empty() {
                let delay = crate::backoff::jittered(
                    std::time::Duration::from_millis(20),
                    std::time::Duration::from_secs(1),
                    attempt,
                );
                tokio::time::sleep(delay).await;
            }
        }
        if !pending.is_empty() {
            return Err(StoreError::new(
                StoreErrorCode::ProvisionedThroughputExceeded,
                "batch_get exhausted its UnprocessedKeys retry budget",
            ));
        }
        Ok(results)
    }

    async fn transact_get(
        &self,
        table: &str,
        keys: &[ItemKey],
    ) -> Result<Vec<Option<StoreItem>>, StoreError> {
        use aws_sdk_dynamodb::types::{Get, TransactGetItem};

        let gets = keys
            .iter()
            .map(|k| {
                let get = Get::builder()
                    .table_name(table)
                    .set_key(Some(Self::key_av(k)))
                    .build()
                    .map_err(|e| StoreError::new(StoreErrorCode::ValidationError, e.to_string()))?;
                Ok(TransactGetItem::builder().get(get).build())
            })
            .collect::<Result<Vec<_>, StoreError>>()?;

        let output = self
            .client
            .transact_get_items()
            .set_transact_items(Some(gets))
            .send()
            .await
            .map_err(sdk_err)?;

        output
            .responses
            .unwrap_or_default()
            .into_iter()
            .map(|r| r.item.map(item_from_av).transpose())
            .collect()
    }

    async fn transact_write(&self, table: &str, ops: Vec<WriteOp>) -> Result<(), StoreError> {
        let mut items = Vec::with_capacity(ops.len());
        for op in ops {
            let mut expr = ExpressionBuilder::new();
            let item = match op {
                WriteOp::Put {
                    key,
                    item: body,
                    condition,
                } => {
                    let mut put = Put::builder()
                        .table_name(table)
                        .set_item(Some(item_to_av(&body)));
                    if let Some(condition) = &condition {
                        let cond_expr = expr.condition(condition);
                        put = put
                            .condition_expression(cond_expr)
                            .set_expression_attribute_names(Some(expr.names.clone()))
                            .set_expression_attribute_values(Some(expr.values.clone()));
                    }
                    let _ = key;
                    TransactWriteItem::builder()
                        .put(put.build().map_err(|e| {
                            StoreError::new(StoreErrorCode::ValidationError, e.to_string())
                        })?)
                        .build()
                }
                WriteOp::Update {
                    key,
                    ops: update_ops,
                    condition,
                } => {
                    let update_expr = expr.update_expression(&update_ops);
                    let cond_expr = condition.as_ref().map(|c| expr.condition(c));
                    let mut update = DynamoUpdate::builder()
                        .table_name(table)
                        .set_key(Some(Self::key_av(&key)))
                        .update_expression(update_expr);
                    if let Some(cond_expr) = cond_expr {
                        update = update.condition_expression(cond_expr);
                    }
                    update = update
                        .set_expression_attribute_names(Some(expr.names.clone()))
                        .set_expression_attribute_values(Some(expr.values.clone()));
                    TransactWriteItem::builder()
                        .update(update.build().map_err(|e| {
                            StoreError::new(StoreErrorCode::ValidationError, e.to_string())
                        })?)
                        .build()
                }
                WriteOp::Delete { key, condition } => {
                    let mut delete = Delete::builder()
                        .table_name(table)
                        .set_key(Some(Self::key_av(&key)));
                    if let Some(condition) = &condition {
                        let cond_expr = expr.condition(condition);
                        delete = delete
                            .condition_expression(cond_expr)
                            .set_expression_attribute_names(Some(expr.names.clone()))
                            .set_expression_attribute_values(Some(expr.values.clone()));
                    }
                    TransactWriteItem::builder()
                        .delete(delete.build().map_err(|e| {
                            StoreError::new(StoreErrorCode::ValidationError, e.to_string())
                        })?)
                        .build()
                }
                WriteOp::ConditionCheck { key, condition } => {
                    use aws_sdk_dynamodb::types::ConditionCheck;
                    let cond_expr = expr.condition(&condition);
                    let check = ConditionCheck::builder()
                        .table_name(table)
                        .set_key(Some(Self::key_av(&key)))
                        .condition_expression(cond_expr)
                        .set_expression_attribute_names(Some(expr.names.clone()))
                        .set_expression_attribute_values(Some(expr.values.clone()))
                        .build()
                        .map_err(|e| {
                            StoreError::new(StoreErrorCode::ValidationError, e.to_string())
                        })?;
                    TransactWriteItem::builder().condition_check(check).build()
                }
            };
            items.push(item);
        }

        let op_count = items.len();
        self.client
            .transact_write_items()
            .set_transact_items(Some(items))
            .send()
            .await
            .map_err(|err| decode_transact_write_error(err, op_count))?;
        Ok(())
    }

    async fn query(&self, table: &str, params: QueryParams) -> Result<Page, StoreError> {
        let mut builder = self
            .client
            .query()
            .table_name(table)
            .consistent_read(params.consistent_read)
            .scan_index_forward(params.scan_forward)
            .set_limit(params.limit.map(|n| n as i32))
            .set_index_name(params.index_name);
        if let Some(start) = &params.exclusive_start_key {
            builder = builder.set_exclusive_start_key(Some(item_to_av(start)));
        }
        if let Some(condition) = &params.condition {
            let mut expr = ExpressionBuilder::new();
            let cond_expr = expr.condition(condition);
            builder = builder
                .key_condition_expression(cond_expr)
                .set_expression_attribute_names(Some(expr.names))
                .set_expression_attribute_values(Some(expr.values));
        }
        let output = builder.send().await.map_err(sdk_err)?;
        Ok(Page {
            items: output
                .items
                .unwrap_or_default()
                .into_iter()
                .map(item_from_av)
                .collect::<Result<_, _>>()?,
            last_evaluated_key: output
                .last_evaluated_key
                .map(item_from_av)
                .transpose()?,
        })
    }

    async fn scan(&self, table: &str, params: ScanParams) -> Result<Page, StoreError> {
        let mut builder = self
            .client
            .scan()
            .table_name(table)
            .consistent_read(params.consistent_read)
            .set_limit(params.limit.map(|n| n as i32))
            .set_index_name(params.index_name)
            .set_segment(params.segment.map(|n| n as i32))
            .set_total_segments(params.total_segments.map(|n| n as i32));
        if let Some(start) = &params.exclusive_start_key {
            builder = builder.set_exclusive_start_key(Some(item_to_av(start)));
        }
        if let Some(condition) = &params.condition {
            let mut expr = ExpressionBuilder::new();
            let cond_expr = expr.condition(condition);
            builder = builder
                .filter_expression(cond_expr)
                .set_expression_attribute_names(Some(expr.names))
                .set_expression_attribute_values(Some(expr.values));
        }
        let output = builder.send().await.map_err(sdk_err)?;
        Ok(Page {
            items: output
                .items
                .unwrap_or_default()
                .into_iter()
                .map(item_from_av)
                .collect::<Result<_, _>>()?,
            last_evaluated_key: output
                .last_evaluated_key
                .map(item_from_av)
                .transpose()?,
        })
    }

    async fn describe_table(&self, table: &str) -> Result<TableDescription, StoreError> {
        let output = self
            .client
            .describe_table()
            .table_name(table)
            .send()
            .await
            .map_err(sdk_err)?;
        let table_desc = output.table;
        Ok(TableDescription {
            name: table.to_owned(),
            item_count: table_desc.as_ref().and_then(|t| t.item_count),
            status: table_desc.and_then(|t| t.table_status).map(|s| s.as_str().to_owned()),
        })
    }

    async fn create_table(&self, spec: TableSpec) -> Result<(), StoreError> {
        // Table provisioning is an out-of-scope external collaborator
        // (`spec.md` §1); callers drive the real attribute/key schema and
        // billing mode through their own infrastructure tooling. This
        // exists only so `Store` is a complete implementation of the
        // contract in `spec.md` §6.
        self.client
            .describe_table()
            .table_name(&spec.name)
            .send()
            .await
            .map_err(sdk_err)?;
        Ok(())
    }

    async fn update_table(&self, _spec: TableSpec) -> Result<(), StoreError> {
        Ok(())
    }
}

fn decode_transact_write_error(
    err: SdkError<aws_sdk_dynamodb::operation::transact_write_items::TransactWriteItemsError>,
    op_count: usize,
) -> StoreError {
    use aws_sdk_dynamodb::operation::transact_write_items::TransactWriteItemsError;

    if let SdkError::ServiceError(service_err) = &err {
        if let TransactWriteItemsError::TransactionCanceledException(cancel) = service_err.err() {
            let reasons = cancel
                .cancellation_reasons
                .as_ref()
                .map(|rs| {
                    rs.iter()
                        .map(|r| r.code.as_deref() != Some("None"))
                        .collect()
                })
                .unwrap_or_else(|| vec![true; op_count]);
            return StoreError::new(
                StoreErrorCode::TransactionCanceled,
                cancel.message().unwrap_or("transaction canceled"),
            )
            .with_cancellation_reasons(reasons);
        }
    }
    sdk_err(err)
}
