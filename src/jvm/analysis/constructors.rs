use crate::jvm::reader::ClassReader;
use crate::jvm::{ClassVisitor, Error, MethodAccessFlags, MethodInfo, MethodVisitor};
use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

/// Constructors of one class, as seen from subclasses
#[derive(Clone, Default, Debug)]
struct Constructors {
    /// Shortest descriptor among `public` and `protected` constructors
    accessible: Option<String>,

    /// Shortest descriptor among all non-`private` constructors
    package: Option<String>,
}

impl Constructors {
    fn offer(slot: &mut Option<String>, descriptor: &str) {
        let shorter = match slot {
            Some(best) => descriptor.len() < best.len(),
            None => true,
        };
        if shorter {
            *slot = Some(descriptor.to_owned());
        }
    }
}

impl ClassVisitor for Constructors {
    fn visit_method(
        &mut self,
        method: &MethodInfo,
    ) -> Result<Option<Box<dyn MethodVisitor + '_>>, Error> {
        if method.name == "<init>" && !method.access.contains(MethodAccessFlags::PRIVATE) {
            if method
                .access
                .intersects(MethodAccessFlags::PUBLIC | MethodAccessFlags::PROTECTED)
            {
                Constructors::offer(&mut self.accessible, &method.descriptor);
            }
            Constructors::offer(&mut self.package, &method.descriptor);
        }
        Ok(None)
    }
}

fn package_of(class_name: &str) -> &str {
    match class_name.rfind('/') {
        Some(slash) => &class_name[..slash],
        None => "",
    }
}

/// Cache of the constructor a subclass should call on its super class
///
/// Generated subclasses need some super constructor to call, and the cheapest one to call is the
/// one with the shortest descriptor. Finding it means parsing the super class, so results are
/// kept per super class name. The cache can be shared between threads; the lock is held while a
/// missing entry is computed, so each super class is parsed at most once.
#[derive(Default, Debug)]
pub struct SuperConstructorCache {
    constructors: Mutex<HashMap<String, Constructors>>,
}

impl SuperConstructorCache {
    pub fn new() -> SuperConstructorCache {
        SuperConstructorCache::default()
    }

    /// Descriptor of the constructor of the super class (given by its class file) that
    /// `class_name` should call, if there is a usable one
    ///
    /// Package-private constructors only count when both classes are in the same package.
    pub fn find_constructor(
        &self,
        class_name: &str,
        super_class: &[u8],
    ) -> Result<Option<String>, Error> {
        let reader = ClassReader::new(super_class)?;
        let super_name = reader.class_name()?;

        let mut cache = self.constructors.lock().unwrap_or_else(PoisonError::into_inner);
        let constructors = match cache.get(&super_name) {
            Some(constructors) => constructors.clone(),
            None => {
                let mut constructors = Constructors::default();
                reader.accept(&mut constructors)?;
                log::debug!(
                    "Constructors of {}: {:?} (package: {:?})",
                    super_name,
                    constructors.accessible,
                    constructors.package
                );
                cache.insert(super_name.clone(), constructors.clone());
                constructors
            }
        };
        drop(cache);

        if package_of(class_name) == package_of(&super_name) {
            Ok(constructors.package)
        } else {
            Ok(constructors.accessible)
        }
    }

    /// Number of super classes looked at so far
    pub fn len(&self) -> usize {
        self.constructors
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
