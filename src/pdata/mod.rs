//! # Telemetry Data Model
//!
//! Traces, logs and metrics share one nesting: a batch holds resource groups, a
//! resource group holds instrumentation-scope groups, and a scope group holds the
//! signal's items (spans, log records or metrics). The nesting is expressed once
//! as the generic [`Batch<T>`] and instantiated per signal:
//!
//! ```text
//! Batch<T>
//!  └── ResourceGroup<T>   (resource attributes, schema url)
//!       └── ScopeGroup<T> (scope name/version/attributes)
//!            └── T        (Span | LogRecord | Metric)
//! ```
//!
//! [`Batch::partition_by`] is the order-preserving splitter the dispatcher uses
//! to cut one inbound batch into per-endpoint sub-batches.

pub mod logs;
pub mod metrics;
pub mod traces;

pub use logs::{LogRecord, Logs, SeverityNumber};
pub use self::metrics::{HistogramDataPoint, Metric, MetricData, Metrics, NumberDataPoint, NumberValue};
pub use traces::{Span, SpanId, SpanKind, TraceId, Traces};

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

use crate::core::types::Endpoint;

/// Attribute key used by resources to name the emitting service
pub const SERVICE_NAME_KEY: &str = "service.name";

/// Attribute value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AnyValue {
    Bool(bool),
    Int(i64),
    Double(f64),
    String(String),
}

impl AnyValue {
    fn type_tag(&self) -> char {
        match self {
            Self::Bool(_) => 'b',
            Self::Int(_) => 'i',
            Self::Double(_) => 'd',
            Self::String(_) => 's',
        }
    }
}

impl fmt::Display for AnyValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(v) => write!(f, "{}", v),
            Self::Int(v) => write!(f, "{}", v),
            Self::Double(v) => write!(f, "{}", v),
            Self::String(v) => f.write_str(v),
        }
    }
}

impl From<&str> for AnyValue {
    fn from(value: &str) -> Self {
        Self::String(value.to_string())
    }
}

impl From<String> for AnyValue {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

impl From<i64> for AnyValue {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<bool> for AnyValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<f64> for AnyValue {
    fn from(value: f64) -> Self {
        Self::Double(value)
    }
}

/// A single key/value attribute
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeyValue {
    pub key: String,
    pub value: AnyValue,
}

impl KeyValue {
    pub fn new(key: impl Into<String>, value: impl Into<AnyValue>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// Look up an attribute by key
pub fn find_attribute<'a>(attributes: &'a [KeyValue], key: &str) -> Option<&'a AnyValue> {
    attributes.iter().find(|kv| kv.key == key).map(|kv| &kv.value)
}

/// The entity producing telemetry
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Resource {
    #[serde(default)]
    pub attributes: Vec<KeyValue>,
    #[serde(default)]
    pub dropped_attributes_count: u32,
}

impl Resource {
    pub fn new(attributes: Vec<KeyValue>) -> Self {
        Self {
            attributes,
            dropped_attributes_count: 0,
        }
    }

    /// Build a resource carrying only a `service.name` attribute
    pub fn for_service(service_name: impl Into<String>) -> Self {
        Self::new(vec![KeyValue::new(SERVICE_NAME_KEY, service_name.into())])
    }

    pub fn attribute(&self, key: &str) -> Option<&AnyValue> {
        find_attribute(&self.attributes, key)
    }

    pub fn service_name(&self) -> Option<String> {
        self.attribute(SERVICE_NAME_KEY).map(|value| value.to_string())
    }

    /// Canonical identity string: `key=<type>:value` pairs sorted and joined by `;`
    ///
    /// Attribute order inside a resource is not significant, so two resources
    /// listing the same attributes in a different order have the same identity.
    /// The type tag (`b`, `i`, `d`, `s`) keeps `Int(1)` apart from `"1"`, and
    /// `\`, `=` and `;` inside keys and values are backslash-escaped.
    pub fn identity(&self) -> String {
        let mut pairs: Vec<String> = self
            .attributes
            .iter()
            .map(|kv| {
                let mut pair = String::new();
                escape_into(&mut pair, &kv.key);
                pair.push('=');
                pair.push(kv.value.type_tag());
                pair.push(':');
                escape_into(&mut pair, &kv.value.to_string());
                pair
            })
            .collect();
        pairs.sort();
        pairs.join(";")
    }
}

fn escape_into(out: &mut String, raw: &str) {
    for c in raw.chars() {
        if matches!(c, '\\' | '=' | ';') {
            out.push('\\');
        }
        out.push(c);
    }
}

/// The instrumentation library that produced a group of items
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct InstrumentationScope {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub attributes: Vec<KeyValue>,
}

impl InstrumentationScope {
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            attributes: Vec::new(),
        }
    }
}

/// Items produced by one instrumentation scope
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScopeGroup<T> {
    #[serde(default)]
    pub scope: InstrumentationScope,
    #[serde(default)]
    pub schema_url: String,
    pub items: Vec<T>,
}

impl<T> ScopeGroup<T> {
    pub fn new(scope: InstrumentationScope, items: Vec<T>) -> Self {
        Self {
            scope,
            schema_url: String::new(),
            items,
        }
    }

    /// Copy of this group's metadata with no items
    fn empty_like(&self) -> Self {
        Self {
            scope: self.scope.clone(),
            schema_url: self.schema_url.clone(),
            items: Vec::new(),
        }
    }
}

/// Scope groups produced by one resource
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceGroup<T> {
    #[serde(default)]
    pub resource: Resource,
    #[serde(default)]
    pub schema_url: String,
    pub scope_groups: Vec<ScopeGroup<T>>,
}

impl<T> ResourceGroup<T> {
    pub fn new(resource: Resource, scope_groups: Vec<ScopeGroup<T>>) -> Self {
        Self {
            resource,
            schema_url: String::new(),
            scope_groups,
        }
    }

    fn empty_like(&self) -> Self {
        Self {
            resource: self.resource.clone(),
            schema_url: self.schema_url.clone(),
            scope_groups: Vec::new(),
        }
    }
}

/// A batch of telemetry items of one signal type
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Batch<T> {
    pub resource_groups: Vec<ResourceGroup<T>>,
}

impl<T> Default for Batch<T> {
    fn default() -> Self {
        Self {
            resource_groups: Vec::new(),
        }
    }
}

impl<T> Batch<T> {
    pub fn new(resource_groups: Vec<ResourceGroup<T>>) -> Self {
        Self { resource_groups }
    }

    /// Build a batch holding a single resource and scope
    pub fn single(resource: Resource, scope: InstrumentationScope, items: Vec<T>) -> Self {
        Self::new(vec![ResourceGroup::new(
            resource,
            vec![ScopeGroup::new(scope, items)],
        )])
    }

    /// Total number of items across all resources and scopes
    pub fn item_count(&self) -> usize {
        self.resource_groups
            .iter()
            .flat_map(|rg| rg.scope_groups.iter())
            .map(|sg| sg.items.len())
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.item_count() == 0
    }

    /// Iterate over every item with its resource, in batch order
    pub fn items(&self) -> impl Iterator<Item = (&Resource, &T)> {
        self.resource_groups.iter().flat_map(|rg| {
            rg.scope_groups
                .iter()
                .flat_map(move |sg| sg.items.iter().map(move |item| (&rg.resource, item)))
        })
    }

    /// Split the batch into one sub-batch per endpoint
    ///
    /// `route` is called exactly once per item, in batch order. Every item is
    /// moved into exactly one sub-batch. Within a sub-batch the resource and
    /// scope grouping of the input is kept (metadata is copied per endpoint) and
    /// items keep their relative order. Sub-batches are returned in the order
    /// their endpoint was first routed to; resource and scope groups left
    /// without items do not appear in any sub-batch.
    pub fn partition_by<F>(self, mut route: F) -> Vec<(Endpoint, Batch<T>)>
    where
        F: FnMut(&Resource, &InstrumentationScope, &T) -> Endpoint,
    {
        let mut batches: OrderedGroups<Batch<T>> = OrderedGroups::new();

        for resource_group in self.resource_groups {
            let mut resources: OrderedGroups<ResourceGroup<T>> = OrderedGroups::new();
            let template = resource_group.empty_like();

            for scope_group in resource_group.scope_groups {
                let mut scopes: OrderedGroups<ScopeGroup<T>> = OrderedGroups::new();
                let scope_template = scope_group.empty_like();

                for item in scope_group.items {
                    let endpoint = route(&template.resource, &scope_template.scope, &item);
                    scopes
                        .entry(endpoint, || scope_template.empty_like())
                        .items
                        .push(item);
                }

                for (endpoint, group) in scopes.into_vec() {
                    resources
                        .entry(endpoint, || template.empty_like())
                        .scope_groups
                        .push(group);
                }
            }

            for (endpoint, group) in resources.into_vec() {
                batches
                    .entry(endpoint, Batch::default)
                    .resource_groups
                    .push(group);
            }
        }

        batches.into_vec()
    }
}

/// Insertion-ordered map from endpoint to a value
///
/// Endpoint counts per batch are small, so a vector plus index keeps first-seen
/// order without pulling in an ordered map crate.
struct OrderedGroups<V> {
    index: HashMap<Endpoint, usize>,
    groups: Vec<(Endpoint, V)>,
}

impl<V> OrderedGroups<V> {
    fn new() -> Self {
        Self {
            index: HashMap::new(),
            groups: Vec::new(),
        }
    }

    fn entry(&mut self, endpoint: Endpoint, default: impl FnOnce() -> V) -> &mut V {
        let position = match self.index.get(&endpoint) {
            Some(&position) => position,
            None => {
                let position = self.groups.len();
                self.index.insert(endpoint.clone(), position);
                self.groups.push((endpoint, default()));
                position
            }
        };
        &mut self.groups[position].1
    }

    fn into_vec(self) -> Vec<(Endpoint, V)> {
        self.groups
    }
}
