use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use crate::api::pool_dto::ResourceSpecDto;
use crate::error::{Error, Result};

/// Amount of one named resource. Compared and hashed by bit pattern, which is
/// well defined because bundles never store `-0.0` or zero entries.
#[derive(Debug, Clone, Copy, Serialize)]
#[serde(transparent)]
pub struct ResourceQuantity(f64);

impl ResourceQuantity {
    pub fn value(self) -> f64 {
        self.0
    }
}

impl PartialEq for ResourceQuantity {
    fn eq(&self, other: &Self) -> bool {
        self.0.to_bits() == other.0.to_bits()
    }
}

impl Eq for ResourceQuantity {}

impl Hash for ResourceQuantity {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.0.to_bits().hash(state);
    }
}

/// One resource-quantity requirement of a placement group, e.g. `{CPU: 4}` for
/// the head actor or `{custom: 1}` for a child actor.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize)]
pub struct Bundle {
    resources: BTreeMap<String, ResourceQuantity>,
}

impl Bundle {
    /// Builds a bundle, dropping zero-valued entries so that `{CPU: 4, GPU: 0}`
    /// and `{CPU: 4}` are the same bundle.
    pub fn new<K: Into<String>>(resources: impl IntoIterator<Item = (K, f64)>) -> Self {
        let mut map = BTreeMap::new();
        for (name, amount) in resources {
            let name = name.into();
            if amount == 0.0 {
                map.remove(&name);
            } else {
                map.insert(name, ResourceQuantity(amount));
            }
        }
        Bundle { resources: map }
    }

    pub fn get(&self, resource: &str) -> f64 {
        self.resources.get(resource).map(|q| q.value()).unwrap_or(0.0)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.resources.iter().map(|(name, q)| (name.as_str(), q.value()))
    }

    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }

    fn validate(&self, index: usize) -> Result<()> {
        if self.resources.is_empty() {
            return Err(Error::SpecInvalid(format!("bundle {} requests no resources", index)));
        }

        for (name, quantity) in &self.resources {
            if name.trim().is_empty() {
                return Err(Error::SpecInvalid(format!("bundle {} contains an empty resource name", index)));
            }
            let amount = quantity.value();
            if !amount.is_finite() || amount < 0.0 {
                return Err(Error::SpecInvalid(format!("bundle {} requests {} of '{}'", index, amount, name)));
            }
        }
        Ok(())
    }
}

impl fmt::Display for Bundle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{")?;
        for (i, (name, amount)) in self.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}: {}", name, amount)?;
        }
        write!(f, "}}")
    }
}

/// Shape of a placement group: an ordered list of bundles. Bundle 0 hosts the
/// head actor, the remaining bundles host child actors.
///
/// Equality and hashing are structural, so two specs with the same bundle
/// sequence are interchangeable for caching. Clones share the bundle storage.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ResourceSpec {
    bundles: Arc<[Bundle]>,
}

impl ResourceSpec {
    pub fn new(bundles: Vec<Bundle>) -> Self {
        ResourceSpec { bundles: bundles.into() }
    }

    pub fn from_bundles<B, K>(bundles: impl IntoIterator<Item = B>) -> Self
    where
        B: IntoIterator<Item = (K, f64)>,
        K: Into<String>,
    {
        Self::new(bundles.into_iter().map(Bundle::new).collect())
    }

    /// Checks that the spec can be sent to a backend: at least one bundle, and
    /// every bundle requests a finite, non-negative amount of named resources.
    pub fn validate(&self) -> Result<()> {
        if self.bundles.is_empty() {
            return Err(Error::SpecInvalid("placement group has no bundles".to_string()));
        }
        self.bundles.iter().enumerate().try_for_each(|(index, bundle)| bundle.validate(index))
    }

    pub fn bundles(&self) -> &[Bundle] {
        &self.bundles
    }

    pub fn head_bundle(&self) -> Option<&Bundle> {
        self.bundles.first()
    }

    pub fn child_bundles(&self) -> &[Bundle] {
        self.bundles.get(1..).unwrap_or(&[])
    }

    pub fn num_bundles(&self) -> usize {
        self.bundles.len()
    }

    /// Sum of every resource over all bundles.
    pub fn required_resources(&self) -> BTreeMap<String, f64> {
        let mut totals = BTreeMap::new();
        for (name, amount) in self.bundles.iter().flat_map(|bundle| bundle.iter()) {
            *totals.entry(name.to_string()).or_insert(0.0) += amount;
        }
        totals
    }
}

impl fmt::Display for ResourceSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[")?;
        for (i, bundle) in self.bundles.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", bundle)?;
        }
        write!(f, "]")
    }
}

impl TryFrom<ResourceSpecDto> for ResourceSpec {
    type Error = Error;

    fn try_from(dto: ResourceSpecDto) -> Result<Self> {
        let spec = ResourceSpec::from_bundles(dto.bundles);
        spec.validate()?;
        Ok(spec)
    }
}
