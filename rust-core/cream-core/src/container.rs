//! # Dependency Container
//!
//! Singleton container: one instance per registered type, built lazily from
//! the constructor dependency lists kept in the [`MetadataRegistry`].
//!
//! Types take part by implementing [`Injectable`] (or by being handed over
//! as ready-made instances). [`ContainerBuilder::provide`] records the
//! dependency list in the registry and the constructor in the builder; the
//! built [`Container`] walks the dependency graph with an explicit stack,
//! constructing leaves first and failing fast on cycles.

use crate::error::{Error, Result};
use crate::metadata::{MetadataKind, MetadataRegistry, MetadataValue, SubjectKey, TypeKey};
use std::any::Any;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use tracing::debug;

type Instance = Arc<dyn Any + Send + Sync>;
type ConstructFn = Arc<dyn Fn(&Dependencies<'_>) -> Result<Instance> + Send + Sync>;

/// A type the container can construct
///
/// ```ignore
/// struct UserService { repo: Arc<UserRepository> }
///
/// impl Injectable for UserService {
///     fn dependencies() -> Vec<TypeKey> {
///         vec![TypeKey::of::<UserRepository>()]
///     }
///
///     fn construct(deps: &Dependencies<'_>) -> Result<Self> {
///         Ok(Self { repo: deps.get()? })
///     }
/// }
/// ```
pub trait Injectable: Sized + Send + Sync + 'static {
    /// Constructor dependencies, in constructor order
    fn dependencies() -> Vec<TypeKey> {
        Vec::new()
    }

    /// Build the instance from already-constructed dependencies
    ///
    /// # Errors
    ///
    /// Implementations may fail; the error aborts the resolution.
    fn construct(deps: &Dependencies<'_>) -> Result<Self>;
}

/// View handed to [`Injectable::construct`]
pub struct Dependencies<'a> {
    container: &'a Container,
    owner: TypeKey,
}

impl Dependencies<'_> {
    /// Fetch a constructed dependency
    ///
    /// # Errors
    ///
    /// Returns `Error::Resolution` if `T` was not declared as a dependency
    /// of the type under construction (and is not otherwise available).
    pub fn get<T: Send + Sync + 'static>(&self) -> Result<Arc<T>> {
        let key = TypeKey::of::<T>();
        let instance = self
            .container
            .cached(key)
            .ok_or_else(|| Error::Resolution {
                type_name: self.owner.name().to_string(),
                reason: format!("dependency {key} is not declared or not constructed"),
            })?;
        downcast::<T>(instance)
    }

    /// Type under construction
    #[must_use]
    pub const fn owner(&self) -> TypeKey {
        self.owner
    }
}

/// Collects constructors during startup
#[derive(Default)]
pub struct ContainerBuilder {
    constructors: HashMap<TypeKey, ConstructFn>,
}

impl ContainerBuilder {
    /// Create an empty builder
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare `T`: its dependency list goes to the registry, its
    /// constructor to the builder
    pub fn provide<T: Injectable>(&mut self, registry: &mut MetadataRegistry) -> &mut Self {
        let key = TypeKey::of::<T>();
        registry.define(
            SubjectKey::of_type(key),
            MetadataKind::Dependencies,
            MetadataValue::Dependencies(T::dependencies()),
        );
        let construct: ConstructFn = Arc::new(|deps: &Dependencies<'_>| {
            T::construct(deps).map(|value| Arc::new(value) as Instance)
        });
        self.constructors.insert(key, construct);
        self
    }

    /// Declare a ready-made instance with no dependencies
    pub fn instance<T: Send + Sync + 'static>(
        &mut self,
        registry: &mut MetadataRegistry,
        value: T,
    ) -> &mut Self {
        let key = TypeKey::of::<T>();
        registry.define(
            SubjectKey::of_type(key),
            MetadataKind::Dependencies,
            MetadataValue::Dependencies(Vec::new()),
        );
        let shared: Instance = Arc::new(value);
        let construct: ConstructFn = Arc::new(move |_: &Dependencies<'_>| Ok(shared.clone()));
        self.constructors.insert(key, construct);
        self
    }

    /// Whether a constructor is known for `T`
    #[must_use]
    pub fn contains<T: 'static>(&self) -> bool {
        self.constructors.contains_key(&TypeKey::of::<T>())
    }

    /// Freeze the constructors against the final registry
    #[must_use]
    pub fn build(self, registry: Arc<MetadataRegistry>) -> Container {
        Container {
            registry,
            constructors: self.constructors,
            instances: RwLock::new(HashMap::new()),
            construction: Mutex::new(()),
        }
    }
}

/// Thread-safe singleton container
///
/// Reads go through an `RwLock`; construction is serialized so every type
/// is constructed at most once.
pub struct Container {
    registry: Arc<MetadataRegistry>,
    constructors: HashMap<TypeKey, ConstructFn>,
    instances: RwLock<HashMap<TypeKey, Instance>>,
    construction: Mutex<()>,
}

impl Container {
    /// Construct `key` and every missing dependency, leaves first
    ///
    /// Already constructed types are left untouched.
    ///
    /// # Errors
    ///
    /// `Error::CycleDetected` when the dependency graph loops back,
    /// `Error::Resolution` when a type has no constructor or its
    /// constructor fails.
    pub fn register(&self, key: TypeKey) -> Result<()> {
        let _guard = self
            .construction
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        for next in self.construction_order(key)? {
            if self.cached(next).is_some() {
                continue;
            }
            let construct = self
                .constructors
                .get(&next)
                .ok_or_else(|| Error::Resolution {
                    type_name: next.name().to_string(),
                    reason: "no constructor registered".to_string(),
                })?;
            let instance = construct(&Dependencies {
                container: self,
                owner: next,
            })
            .map_err(|e| match e {
                Error::Resolution { .. } | Error::CycleDetected { .. } => e,
                other => Error::Resolution {
                    type_name: next.name().to_string(),
                    reason: other.to_string(),
                },
            })?;
            debug!(type_name = next.name(), "Constructed singleton");
            self.instances
                .write()
                .unwrap_or_else(PoisonError::into_inner)
                .insert(next, instance);
        }
        Ok(())
    }

    /// Cached instance of `T`, constructing it on first use
    ///
    /// # Errors
    ///
    /// Same as [`Container::register`], plus `Error::Resolution` when the
    /// stored instance is not a `T`.
    pub fn resolve<T: Send + Sync + 'static>(&self) -> Result<Arc<T>> {
        downcast::<T>(self.resolve_key(TypeKey::of::<T>())?)
    }

    /// Type-erased [`Container::resolve`]
    ///
    /// # Errors
    ///
    /// Same as [`Container::register`].
    pub fn resolve_key(&self, key: TypeKey) -> Result<Arc<dyn Any + Send + Sync>> {
        if let Some(found) = self.cached(key) {
            return Ok(found);
        }
        self.register(key)?;
        self.cached(key).ok_or_else(|| Error::Resolution {
            type_name: key.name().to_string(),
            reason: "registration produced no instance".to_string(),
        })
    }

    /// Whether an instance of `T` has been constructed
    #[must_use]
    pub fn contains<T: 'static>(&self) -> bool {
        self.cached(TypeKey::of::<T>()).is_some()
    }

    /// Number of constructed instances
    #[must_use]
    pub fn len(&self) -> usize {
        self.instances
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Whether nothing has been constructed yet
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn cached(&self, key: TypeKey) -> Option<Instance> {
        self.instances
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&key)
            .cloned()
    }

    fn dependencies_of(&self, key: TypeKey) -> &[TypeKey] {
        self.registry.dependencies(key).unwrap_or(&[])
    }

    /// Post-order walk of the missing part of the dependency graph
    fn construction_order(&self, root: TypeKey) -> Result<Vec<TypeKey>> {
        let mut order = Vec::new();
        if self.cached(root).is_some() {
            return Ok(order);
        }

        let mut done: HashSet<TypeKey> = HashSet::new();
        // (type, index of the next dependency to visit)
        let mut stack: Vec<(TypeKey, usize)> = vec![(root, 0)];

        while let Some(top) = stack.last_mut() {
            let key = top.0;
            let deps = self.dependencies_of(key);
            if top.1 < deps.len() {
                let dep = deps[top.1];
                top.1 += 1;
                if done.contains(&dep) || self.cached(dep).is_some() {
                    continue;
                }
                if let Some(start) = stack.iter().position(|(k, _)| *k == dep) {
                    let cycle = stack[start..]
                        .iter()
                        .map(|(k, _)| k.name())
                        .chain(std::iter::once(dep.name()))
                        .collect::<Vec<_>>()
                        .join(" -> ");
                    return Err(Error::CycleDetected { cycle });
                }
                stack.push((dep, 0));
            } else {
                stack.pop();
                if done.insert(key) {
                    order.push(key);
                }
            }
        }
        Ok(order)
    }
}

impl std::fmt::Debug for Container {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let instances = self
            .instances
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        f.debug_struct("Container")
            .field(
                "constructors",
                &self.constructors.keys().collect::<Vec<_>>(),
            )
            .field("instances", &instances.keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

fn downcast<T: Send + Sync + 'static>(instance: Instance) -> Result<Arc<T>> {
    instance.downcast::<T>().map_err(|_| Error::Resolution {
        type_name: std::any::type_name::<T>().to_string(),
        reason: "stored instance has a different type".to_string(),
    })
}
