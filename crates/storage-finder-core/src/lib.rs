use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::fmt::{Display, Formatter};

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};

/// Literal rendered in a comparison cell when a service has no value for an attribute.
pub const NOT_AVAILABLE: &str = "N/A";

#[derive(Debug, Clone, thiserror::Error, Eq, PartialEq)]
pub enum CatalogError {
    #[error("failed to parse {document}: {message}")]
    Parse { document: String, message: String },
    #[error("validation error: {0}")]
    Validation(String),
}

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self(value)
            }
        }

        impl Display for $name {
            fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
                f.write_str(&self.0)
            }
        }
    };
}

string_id!(
    /// Identifier of a facet (a question in the facet tree).
    FacetId
);
string_id!(
    /// Identifier of a selectable choice within a facet.
    ChoiceId
);
string_id!(
    /// Identifier of a catalog service.
    ServiceId
);

/// How many choices of a facet can be checked at once.
///
/// The catalog encodes single-select facets as `"radio"`. Every other value,
/// including a missing one, is a multi-select (`"checkbox"`) facet.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, Eq, PartialEq, Hash)]
#[serde(from = "Option<String>", into = "String")]
pub enum ControlType {
    SingleSelect,
    #[default]
    MultiSelect,
}

impl ControlType {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::SingleSelect => "radio",
            Self::MultiSelect => "checkbox",
        }
    }
}

impl From<Option<String>> for ControlType {
    fn from(value: Option<String>) -> Self {
        match value.as_deref() {
            Some("radio" | "single-select") => Self::SingleSelect,
            _ => Self::MultiSelect,
        }
    }
}

impl From<ControlType> for String {
    fn from(value: ControlType) -> Self {
        value.as_str().to_string()
    }
}

/// How services that fail the current facet selections are surfaced.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, Eq, PartialEq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum NonMatchingPolicy {
    #[default]
    ShowDisabled,
    ShowEnabled,
    Hide,
}

impl NonMatchingPolicy {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ShowDisabled => "show-disabled",
            Self::ShowEnabled => "show-enabled",
            Self::Hide => "hide",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "show-disabled" => Some(Self::ShowDisabled),
            "show-enabled" => Some(Self::ShowEnabled),
            "hide" => Some(Self::Hide),
            _ => None,
        }
    }

    /// Whether non-matching services stay selectable under this policy.
    #[must_use]
    pub fn keeps_non_matching_selectable(self) -> bool {
        matches!(self, Self::ShowEnabled)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FacetChoice {
    pub id: ChoiceId,
    pub name: String,
    #[serde(default, deserialize_with = "lenient_text", skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Facet {
    pub id: FacetId,
    pub name: String,
    #[serde(default)]
    pub control_type: ControlType,
    #[serde(default, deserialize_with = "lenient_text", skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub choices: Vec<FacetChoice>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Facet {
    #[must_use]
    pub fn choice(&self, choice_id: &ChoiceId) -> Option<&FacetChoice> {
        self.choices.iter().find(|choice| &choice.id == choice_id)
    }
}

/// One attribute of a service as shown in the comparison table.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(from = "Value")]
pub struct FieldData {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weight: Option<f64>,
}

impl FieldData {
    /// Lenient conversion used when loading catalogs: shapes that do not fit are absent.
    fn from_json(value: Value) -> Self {
        let Value::Object(mut object) = value else {
            return Self::default();
        };

        Self {
            value: object.remove("value").and_then(scalar_text),
            label: object.remove("label").and_then(scalar_text),
            weight: object.remove("weight").as_ref().and_then(numeric_weight),
        }
    }

    #[must_use]
    pub fn display_label(&self) -> Option<&str> {
        self.label.as_deref().filter(|label| !label.is_empty())
    }
}

impl From<Value> for FieldData {
    fn from(value: Value) -> Self {
        Self::from_json(value)
    }
}

fn scalar_text(value: Value) -> Option<String> {
    match value {
        Value::String(text) => Some(text),
        Value::Number(number) => Some(number.to_string()),
        Value::Bool(flag) => Some(flag.to_string()),
        _ => None,
    }
}

fn numeric_weight(value: &Value) -> Option<f64> {
    let weight = match value {
        Value::Number(number) => number.as_f64(),
        Value::String(text) => text.trim().parse::<f64>().ok(),
        _ => None,
    };
    weight.filter(|weight| weight.is_finite())
}

fn lenient_text<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<Value>::deserialize(deserializer)?.and_then(scalar_text))
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de> + Default,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// Attribute key to field data, in the order the catalog lists them.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FieldDataMap {
    entries: Vec<(String, FieldData)>,
}

impl FieldDataMap {
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&FieldData> {
        self.entries.iter().find(|(candidate, _)| candidate == key).map(|(_, data)| data)
    }

    #[must_use]
    pub fn contains_key(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &FieldData)> {
        self.entries.iter().map(|(key, data)| (key.as_str(), data))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl FromIterator<(String, FieldData)> for FieldDataMap {
    fn from_iter<I: IntoIterator<Item = (String, FieldData)>>(iter: I) -> Self {
        let mut map = Self::default();
        for (key, data) in iter {
            match map.entries.iter_mut().find(|(candidate, _)| *candidate == key) {
                Some(entry) => entry.1 = data,
                None => map.entries.push((key, data)),
            }
        }
        map
    }
}

impl Serialize for FieldDataMap {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_map(self.entries.iter().map(|(key, data)| (key, data)))
    }
}

impl<'de> Deserialize<'de> for FieldDataMap {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        // Empty maps sometimes arrive as `[]`; anything but an object is no data.
        let Value::Object(raw) = Value::deserialize(deserializer)? else {
            return Ok(Self::default());
        };
        Ok(raw.into_iter().map(|(key, value)| (key, FieldData::from_json(value))).collect())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Service {
    pub id: ServiceId,
    pub title: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub facet_matches: BTreeSet<ChoiceId>,
    #[serde(default, deserialize_with = "lenient_text", skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(default)]
    pub field_data: FieldDataMap,
}

impl Service {
    /// Passes when every answered facet has at least one checked choice this
    /// service matches.
    #[must_use]
    pub fn matches(&self, selections: &FacetSelections) -> bool {
        selections.iter().all(|(_, choices)| !choices.is_disjoint(&self.facet_matches))
    }

    #[must_use]
    pub fn field_value(&self, key: &str) -> Option<&str> {
        self.field_data.get(key).and_then(|data| data.value.as_deref())
    }
}

/// Services passing the facet selections, in catalog order.
#[must_use]
pub fn filter_services<'a>(
    selections: &FacetSelections,
    services: &'a [Service],
) -> Vec<&'a Service> {
    services.iter().filter(|service| service.matches(selections)).collect()
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Attribute {
    pub key: String,
    pub label: String,
    pub weight: Option<f64>,
}

/// Ordered comparison-table rows derived once from the catalog.
#[derive(Debug, Clone, Default, Serialize, PartialEq)]
#[serde(transparent)]
pub struct AttributeIndex(Vec<Attribute>);

impl AttributeIndex {
    /// Collects each labelled attribute key once, keeping the first label seen.
    /// The weight comes from the first service defining the key at all, and
    /// keys are stably sorted by it with missing weights last.
    #[must_use]
    pub fn from_services(services: &[Service]) -> Self {
        let mut first_weight: HashMap<&str, Option<f64>> = HashMap::new();
        let mut labelled: HashSet<&str> = HashSet::new();
        let mut attributes = Vec::new();

        for service in services {
            for (key, data) in service.field_data.iter() {
                first_weight.entry(key).or_insert(data.weight);
                if labelled.contains(key) {
                    continue;
                }
                if let Some(label) = data.display_label() {
                    labelled.insert(key);
                    attributes.push(Attribute {
                        key: key.to_string(),
                        label: label.to_string(),
                        weight: None,
                    });
                }
            }
        }

        for attribute in &mut attributes {
            attribute.weight = first_weight.get(attribute.key.as_str()).copied().flatten();
        }
        attributes.sort_by(|a, b| compare_weights(a.weight, b.weight));

        Self(attributes)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Attribute> {
        self.0.iter()
    }

    #[must_use]
    pub fn as_slice(&self) -> &[Attribute] {
        &self.0
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

fn compare_weights(a: Option<f64>, b: Option<f64>) -> Ordering {
    match (a, b) {
        (Some(a), Some(b)) => a.total_cmp(&b),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

#[derive(Debug, Clone)]
pub struct Catalog {
    facets: Vec<Facet>,
    services: Vec<Service>,
    attribute_index: AttributeIndex,
}

impl Catalog {
    /// # Errors
    /// Returns [`CatalogError::Validation`] when a facet, choice or service has an empty id.
    pub fn new(facets: Vec<Facet>, services: Vec<Service>) -> Result<Self, CatalogError> {
        for facet in &facets {
            if facet.id.as_str().is_empty() {
                return Err(CatalogError::Validation(format!(
                    "facet `{}` has an empty id",
                    facet.name
                )));
            }
            if let Some(choice) = facet.choices.iter().find(|choice| choice.id.as_str().is_empty())
            {
                return Err(CatalogError::Validation(format!(
                    "choice `{}` of facet {} has an empty id",
                    choice.name, facet.id
                )));
            }
        }
        if let Some(service) = services.iter().find(|service| service.id.as_str().is_empty()) {
            return Err(CatalogError::Validation(format!(
                "service `{}` has an empty id",
                service.title
            )));
        }

        let attribute_index = AttributeIndex::from_services(&services);
        tracing::debug!(
            facets = facets.len(),
            services = services.len(),
            attributes = attribute_index.len(),
            "catalog indexed"
        );

        Ok(Self { facets, services, attribute_index })
    }

    /// Builds a catalog from the facet-tree and service-list JSON documents.
    ///
    /// # Errors
    /// Returns [`CatalogError::Parse`] when either document is not a list of
    /// records of the expected shape, or the validation errors of [`Catalog::new`].
    pub fn from_json(facet_tree: &str, service_list: &str) -> Result<Self, CatalogError> {
        let facets = serde_json::from_str::<Vec<Facet>>(facet_tree).map_err(|err| {
            CatalogError::Parse { document: "facet tree".to_string(), message: err.to_string() }
        })?;
        let services = serde_json::from_str::<Vec<Service>>(service_list).map_err(|err| {
            CatalogError::Parse { document: "service list".to_string(), message: err.to_string() }
        })?;
        Self::new(facets, services)
    }

    #[must_use]
    pub fn facets(&self) -> &[Facet] {
        &self.facets
    }

    #[must_use]
    pub fn services(&self) -> &[Service] {
        &self.services
    }

    #[must_use]
    pub fn attribute_index(&self) -> &AttributeIndex {
        &self.attribute_index
    }

    #[must_use]
    pub fn facet(&self, facet_id: &FacetId) -> Option<&Facet> {
        self.facets.iter().find(|facet| &facet.id == facet_id)
    }

    #[must_use]
    pub fn service(&self, service_id: &ServiceId) -> Option<&Service> {
        self.services.iter().find(|service| &service.id == service_id)
    }

    #[must_use]
    pub fn filter(&self, selections: &FacetSelections) -> Vec<&Service> {
        filter_services(selections, &self.services)
    }

    /// Matching status of a catalog id; unknown ids never match.
    #[must_use]
    pub fn is_matching(&self, service_id: &ServiceId, selections: &FacetSelections) -> bool {
        self.service(service_id).is_some_and(|service| service.matches(selections))
    }
}

/// Checked choices per facet. Facets without a checked choice have no entry.
#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
#[serde(transparent)]
pub struct FacetSelections(BTreeMap<FacetId, BTreeSet<ChoiceId>>);

impl FacetSelections {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn choices(&self, facet_id: &FacetId) -> Option<&BTreeSet<ChoiceId>> {
        self.0.get(facet_id)
    }

    #[must_use]
    pub fn is_checked(&self, facet_id: &FacetId, choice_id: &ChoiceId) -> bool {
        self.0.get(facet_id).is_some_and(|choices| choices.contains(choice_id))
    }

    pub fn iter(&self) -> impl Iterator<Item = (&FacetId, &BTreeSet<ChoiceId>)> {
        self.0.iter()
    }

    fn select_only(&mut self, facet_id: &FacetId, choice_id: &ChoiceId) {
        self.0.insert(facet_id.clone(), BTreeSet::from([choice_id.clone()]));
    }

    fn insert(&mut self, facet_id: &FacetId, choice_id: &ChoiceId) {
        self.0.entry(facet_id.clone()).or_default().insert(choice_id.clone());
    }

    fn remove(&mut self, facet_id: &FacetId, choice_id: &ChoiceId) {
        if let Some(choices) = self.0.get_mut(facet_id) {
            choices.remove(choice_id);
            if choices.is_empty() {
                self.0.remove(facet_id);
            }
        }
    }

    fn clear(&mut self) {
        self.0.clear();
    }
}

/// Selected services in the order they were selected.
#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
#[serde(transparent)]
pub struct ServiceSelections(Vec<ServiceId>);

impl ServiceSelections {
    #[must_use]
    pub fn contains(&self, service_id: &ServiceId) -> bool {
        self.0.contains(service_id)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    #[must_use]
    pub fn as_slice(&self) -> &[ServiceId] {
        &self.0
    }

    pub fn iter(&self) -> impl Iterator<Item = &ServiceId> {
        self.0.iter()
    }

    fn insert(&mut self, service_id: &ServiceId) {
        if !self.contains(service_id) {
            self.0.push(service_id.clone());
        }
    }

    fn remove(&mut self, service_id: &ServiceId) {
        self.0.retain(|candidate| candidate != service_id);
    }

    fn retain(&mut self, mut keep: impl FnMut(&ServiceId) -> bool) {
        self.0.retain(|service_id| keep(service_id));
    }

    fn replace(&mut self, service_ids: Vec<ServiceId>) {
        self.0 = service_ids;
    }

    fn clear(&mut self) {
        self.0.clear();
    }
}

/// A discrete user input applied to a [`SelectionState`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SelectionEvent {
    ToggleFacetChoice { facet_id: FacetId, choice_id: ChoiceId, checked: bool },
    ToggleService { service_id: ServiceId },
    SetPolicy { policy: NonMatchingPolicy },
    SelectAllVisible,
    ClearServiceSelections,
    ClearFacetAnswers,
}

/// Snapshot of everything the user has chosen. Transitions never mutate a
/// snapshot; they return the next one.
#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct SelectionState {
    facet_selections: FacetSelections,
    service_selections: ServiceSelections,
    policy: NonMatchingPolicy,
}

impl SelectionState {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_policy(policy: NonMatchingPolicy) -> Self {
        Self { policy, ..Self::default() }
    }

    #[must_use]
    pub fn facet_selections(&self) -> &FacetSelections {
        &self.facet_selections
    }

    #[must_use]
    pub fn service_selections(&self) -> &ServiceSelections {
        &self.service_selections
    }

    #[must_use]
    pub fn policy(&self) -> NonMatchingPolicy {
        self.policy
    }

    #[must_use]
    pub fn apply(&self, catalog: &Catalog, event: &SelectionEvent) -> Self {
        match event {
            SelectionEvent::ToggleFacetChoice { facet_id, choice_id, checked } => {
                self.toggle_facet_choice(catalog, facet_id, choice_id, *checked)
            }
            SelectionEvent::ToggleService { service_id } => {
                self.toggle_service_selection(catalog, service_id)
            }
            SelectionEvent::SetPolicy { policy } => self.set_policy(catalog, *policy),
            SelectionEvent::SelectAllVisible => self.select_all_visible(catalog),
            SelectionEvent::ClearServiceSelections => self.clear_service_selections(),
            SelectionEvent::ClearFacetAnswers => self.clear_facet_answers(),
        }
    }

    /// Checks or unchecks a facet choice. Checking a single-select choice
    /// replaces the facet's previous answer. Unless the policy keeps
    /// non-matching services selectable, selections failing the new filter are
    /// dropped. Ids missing from the facet tree leave the state unchanged.
    #[must_use]
    pub fn toggle_facet_choice(
        &self,
        catalog: &Catalog,
        facet_id: &FacetId,
        choice_id: &ChoiceId,
        checked: bool,
    ) -> Self {
        let Some(facet) = catalog.facet(facet_id) else {
            tracing::debug!(%facet_id, "ignoring toggle for unknown facet");
            return self.clone();
        };
        if facet.choice(choice_id).is_none() {
            tracing::debug!(%facet_id, %choice_id, "ignoring toggle for unknown choice");
            return self.clone();
        }

        let mut next = self.clone();
        match (checked, facet.control_type) {
            (true, ControlType::SingleSelect) => {
                next.facet_selections.select_only(facet_id, choice_id);
            }
            (true, ControlType::MultiSelect) => next.facet_selections.insert(facet_id, choice_id),
            (false, _) => next.facet_selections.remove(facet_id, choice_id),
        }
        tracing::debug!(%facet_id, %choice_id, checked, "facet choice toggled");

        if !next.policy.keeps_non_matching_selectable() {
            next.purge_non_matching(catalog);
        }
        next
    }

    /// Adds or removes a service. Removing always succeeds; adding is ignored
    /// for unknown ids and for non-matching services unless the policy keeps
    /// them selectable.
    #[must_use]
    pub fn toggle_service_selection(&self, catalog: &Catalog, service_id: &ServiceId) -> Self {
        let mut next = self.clone();
        if next.service_selections.contains(service_id) {
            next.service_selections.remove(service_id);
            return next;
        }

        let Some(service) = catalog.service(service_id) else {
            tracing::debug!(%service_id, "ignoring selection of unknown service");
            return next;
        };
        if service.matches(&next.facet_selections) || next.policy.keeps_non_matching_selectable() {
            next.service_selections.insert(service_id);
        } else {
            tracing::debug!(
                %service_id,
                policy = next.policy.as_str(),
                "service is not selectable"
            );
        }
        next
    }

    /// Leaving `show-enabled` purges the selections that do not match the
    /// current filter. No other policy change touches the selection.
    #[must_use]
    pub fn set_policy(&self, catalog: &Catalog, policy: NonMatchingPolicy) -> Self {
        let mut next = self.clone();
        if self.policy.keeps_non_matching_selectable() && !policy.keeps_non_matching_selectable() {
            next.purge_non_matching(catalog);
        }
        next.policy = policy;
        next
    }

    /// Replaces the selection with every service passing the current filter.
    #[must_use]
    pub fn select_all_visible(&self, catalog: &Catalog) -> Self {
        let mut next = self.clone();
        let visible = catalog
            .filter(&self.facet_selections)
            .into_iter()
            .map(|service| service.id.clone())
            .collect();
        next.service_selections.replace(visible);
        next
    }

    #[must_use]
    pub fn clear_service_selections(&self) -> Self {
        let mut next = self.clone();
        next.service_selections.clear();
        next
    }

    #[must_use]
    pub fn clear_facet_answers(&self) -> Self {
        let mut next = self.clone();
        next.facet_selections.clear();
        next
    }

    #[must_use]
    pub fn filtered<'a>(&self, catalog: &'a Catalog) -> Vec<&'a Service> {
        catalog.filter(&self.facet_selections)
    }

    #[must_use]
    pub fn affordances(&self, catalog: &Catalog) -> Affordances {
        let filtered = self.filtered(catalog);
        let select_all_blocked_by = if filtered.is_empty() {
            Some(SelectAllBlocker::NoServicesAvailable)
        } else if filtered.iter().all(|service| self.service_selections.contains(&service.id)) {
            Some(SelectAllBlocker::AllAlreadySelected)
        } else {
            None
        };

        Affordances {
            select_all_disabled: select_all_blocked_by.is_some(),
            select_all_blocked_by,
            clear_selections_disabled: self.service_selections.is_empty(),
            clear_answers_disabled: self.facet_selections.is_empty(),
        }
    }

    fn purge_non_matching(&mut self, catalog: &Catalog) {
        let before = self.service_selections.len();
        let facet_selections = &self.facet_selections;
        self.service_selections
            .retain(|service_id| catalog.is_matching(service_id, facet_selections));
        let purged = before - self.service_selections.len();
        if purged > 0 {
            tracing::debug!(purged, "dropped non-matching service selections");
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "kebab-case")]
pub enum SelectAllBlocker {
    NoServicesAvailable,
    AllAlreadySelected,
}

/// Disabled flags for the bulk-action controls.
#[derive(Debug, Clone, Copy, Serialize, Eq, PartialEq)]
pub struct Affordances {
    pub select_all_disabled: bool,
    pub select_all_blocked_by: Option<SelectAllBlocker>,
    pub clear_selections_disabled: bool,
    pub clear_answers_disabled: bool,
}

/// A comparison-table cell.
///
/// `Markup` carries the catalog's rich-text value exactly as stored. It is not
/// escaped or sanitized here; the rendering surface owns that policy.
#[derive(Debug, Clone, Serialize, Eq, PartialEq)]
#[serde(tag = "kind", content = "markup", rename_all = "snake_case")]
pub enum ComparisonCell {
    Markup(String),
    NotAvailable,
}

impl ComparisonCell {
    #[must_use]
    pub fn as_display(&self) -> &str {
        match self {
            Self::Markup(markup) => markup,
            Self::NotAvailable => NOT_AVAILABLE,
        }
    }
}

#[derive(Debug, Clone, Serialize, Eq, PartialEq)]
pub struct ComparisonColumn {
    pub service_id: ServiceId,
    pub title: Option<String>,
}

#[derive(Debug, Clone, Serialize, Eq, PartialEq)]
pub struct ComparisonRow {
    pub key: String,
    pub label: String,
    pub cells: Vec<ComparisonCell>,
}

#[derive(Debug, Clone, Serialize, Eq, PartialEq)]
pub struct ComparisonTable {
    pub heading: String,
    pub columns: Vec<ComparisonColumn>,
    pub rows: Vec<ComparisonRow>,
}

#[must_use]
pub fn comparison_cell(catalog: &Catalog, service_id: &ServiceId, key: &str) -> ComparisonCell {
    catalog
        .service(service_id)
        .and_then(|service| service.field_value(key))
        .map_or(ComparisonCell::NotAvailable, |value| ComparisonCell::Markup(value.to_string()))
}

#[must_use]
pub fn comparison_row(
    catalog: &Catalog,
    attribute: &Attribute,
    service_ids: &[ServiceId],
) -> ComparisonRow {
    ComparisonRow {
        key: attribute.key.clone(),
        label: attribute.label.clone(),
        cells: service_ids
            .iter()
            .map(|service_id| comparison_cell(catalog, service_id, &attribute.key))
            .collect(),
    }
}

/// Builds the table for the selected services, one column per selection in
/// selection order and one row per indexed attribute. `None` when nothing is
/// selected.
#[must_use]
pub fn build_comparison_table(
    catalog: &Catalog,
    selections: &ServiceSelections,
) -> Option<ComparisonTable> {
    if selections.is_empty() {
        return None;
    }

    let service_ids = selections.as_slice();
    let heading = if service_ids.len() == 1 {
        "Service Details"
    } else {
        "Service Details and Comparison"
    };

    Some(ComparisonTable {
        heading: heading.to_string(),
        columns: service_ids
            .iter()
            .map(|service_id| ComparisonColumn {
                service_id: service_id.clone(),
                title: catalog.service(service_id).map(|service| service.title.clone()),
            })
            .collect(),
        rows: catalog
            .attribute_index()
            .iter()
            .map(|attribute| comparison_row(catalog, attribute, service_ids))
            .collect(),
    })
}

#[derive(Debug, Clone, Serialize, Eq, PartialEq)]
pub struct ChoicePanel {
    pub id: ChoiceId,
    pub name: String,
    pub description: Option<String>,
    pub checked: bool,
}

#[derive(Debug, Clone, Serialize, Eq, PartialEq)]
pub struct FacetPanel {
    pub id: FacetId,
    pub name: String,
    pub control_type: ControlType,
    pub description: Option<String>,
    pub choices: Vec<ChoicePanel>,
}

#[derive(Debug, Clone, Copy, Serialize, Eq, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum TilePresentation {
    Normal,
    /// Non-matching but selectable.
    Highlighted,
    Disabled,
}

#[derive(Debug, Clone, Serialize, Eq, PartialEq)]
pub struct ServiceTile {
    pub id: ServiceId,
    pub title: String,
    pub selected: bool,
    pub matching: bool,
    pub presentation: TilePresentation,
}

/// Everything a renderer needs, derived from a catalog and one selection snapshot.
#[derive(Debug, Clone, Serialize, Eq, PartialEq)]
pub struct View {
    pub policy: NonMatchingPolicy,
    pub total_services: usize,
    /// Only present while at least one facet is answered.
    pub available_services: Option<usize>,
    pub selected_services: usize,
    pub selection_label: String,
    pub select_all_label: String,
    pub facets: Vec<FacetPanel>,
    pub services: Vec<ServiceTile>,
    pub filtered_service_ids: Vec<ServiceId>,
    pub selected_service_ids: Vec<ServiceId>,
    pub affordances: Affordances,
    pub comparison: Option<ComparisonTable>,
}

impl View {
    #[must_use]
    pub fn derive(catalog: &Catalog, state: &SelectionState) -> Self {
        let facet_selections = state.facet_selections();
        let service_selections = state.service_selections();
        let filtered_service_ids = state
            .filtered(catalog)
            .into_iter()
            .map(|service| service.id.clone())
            .collect::<Vec<_>>();
        let answered = !facet_selections.is_empty();

        let facets = catalog
            .facets()
            .iter()
            .map(|facet| FacetPanel {
                id: facet.id.clone(),
                name: facet.name.clone(),
                control_type: facet.control_type,
                description: facet.description.clone(),
                choices: facet
                    .choices
                    .iter()
                    .map(|choice| ChoicePanel {
                        id: choice.id.clone(),
                        name: choice.name.clone(),
                        description: choice.description.clone(),
                        checked: facet_selections.is_checked(&facet.id, &choice.id),
                    })
                    .collect(),
            })
            .collect();

        let services = catalog
            .services()
            .iter()
            .filter_map(|service| {
                let matching = service.matches(facet_selections);
                let presentation = match (matching, state.policy()) {
                    (true, _) => TilePresentation::Normal,
                    (false, NonMatchingPolicy::Hide) => return None,
                    (false, NonMatchingPolicy::ShowDisabled) => TilePresentation::Disabled,
                    (false, NonMatchingPolicy::ShowEnabled) => TilePresentation::Highlighted,
                };
                Some(ServiceTile {
                    id: service.id.clone(),
                    title: service.title.clone(),
                    selected: service_selections.contains(&service.id),
                    matching,
                    presentation,
                })
            })
            .collect();

        let selection_label = if service_selections.is_empty() {
            "None Selected".to_string()
        } else {
            format!("{} Selected", service_selections.len())
        };
        let select_all_label = if answered { "Select All Available" } else { "Select All" };

        Self {
            policy: state.policy(),
            total_services: catalog.services().len(),
            available_services: answered.then_some(filtered_service_ids.len()),
            selected_services: service_selections.len(),
            selection_label,
            select_all_label: select_all_label.to_string(),
            facets,
            services,
            filtered_service_ids,
            selected_service_ids: service_selections.as_slice().to_vec(),
            affordances: state.affordances(catalog),
            comparison: build_comparison_table(catalog, service_selections),
        }
    }
}

/// Owns the catalog and the current selection snapshot, and rebuilds the
/// [`View`] after every applied event.
#[derive(Debug, Clone)]
pub struct Session {
    catalog: Catalog,
    state: SelectionState,
    view: View,
}

impl Session {
    #[must_use]
    pub fn new(catalog: Catalog) -> Self {
        Self::with_state(catalog, SelectionState::new())
    }

    #[must_use]
    pub fn with_state(catalog: Catalog, state: SelectionState) -> Self {
        let view = View::derive(&catalog, &state);
        Self { catalog, state, view }
    }

    #[must_use]
    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    #[must_use]
    pub fn state(&self) -> &SelectionState {
        &self.state
    }

    #[must_use]
    pub fn view(&self) -> &View {
        &self.view
    }

    pub fn apply(&mut self, event: &SelectionEvent) -> &View {
        self.state = self.state.apply(&self.catalog, event);
        self.view = View::derive(&self.catalog, &self.state);
        &self.view
    }

    pub fn apply_all<'a, I>(&mut self, events: I) -> &View
    where
        I: IntoIterator<Item = &'a SelectionEvent>,
    {
        for event in events {
            self.state = self.state.apply(&self.catalog, event);
        }
        self.view = View::derive(&self.catalog, &self.state);
        &self.view
    }
}
