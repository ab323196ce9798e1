use std::collections::HashMap;

/// Answers "what is the nearest common super class of these two classes?" during frame merges
///
/// Names are internal names (`java/lang/String`). `None` means the hierarchy cannot tell, in which
/// case `java/lang/Object` is assumed.
pub trait ClassHierarchy {
    fn common_super_class(&self, class1: &str, class2: &str) -> Option<String>;
}

/// Hierarchy that knows nothing beyond "a class is its own super class"
#[derive(Copy, Clone, Default, Debug)]
pub struct ObjectHierarchy;

impl ClassHierarchy for ObjectHierarchy {
    fn common_super_class(&self, class1: &str, class2: &str) -> Option<String> {
        if class1 == class2 {
            Some(class1.to_owned())
        } else {
            None
        }
    }
}

/// Hierarchy backed by a known map of class to super class
///
/// Interfaces are not tracked: two classes whose only link is an interface merge to
/// `java/lang/Object`, which is what the verifier expects anyway.
#[derive(Clone, Default, Debug)]
pub struct MapHierarchy {
    super_classes: HashMap<String, String>,
}

impl MapHierarchy {
    pub fn new() -> MapHierarchy {
        MapHierarchy::default()
    }

    pub fn add(&mut self, class: &str, super_class: &str) -> &mut Self {
        self.super_classes
            .insert(class.to_owned(), super_class.to_owned());
        self
    }

    /// The class itself followed by every known ancestor
    fn ancestors<'a>(&'a self, class: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        let mut next = Some(class);
        let mut remaining = self.super_classes.len() + 1;
        std::iter::from_fn(move || {
            let current = next?;
            if remaining == 0 {
                // cycle in the map
                return None;
            }
            remaining -= 1;
            next = self.super_classes.get(current).map(String::as_str);
            Some(current)
        })
    }
}

impl ClassHierarchy for MapHierarchy {
    fn common_super_class(&self, class1: &str, class2: &str) -> Option<String> {
        if class1 == class2 {
            return Some(class1.to_owned());
        }
        let ancestors1: Vec<&str> = self.ancestors(class1).collect();
        self.ancestors(class2)
            .find(|ancestor| ancestors1.contains(ancestor))
            .map(str::to_owned)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn object_hierarchy_only_knows_identity() {
        assert_eq!(
            ObjectHierarchy.common_super_class("a/B", "a/B").as_deref(),
            Some("a/B")
        );
        assert_eq!(ObjectHierarchy.common_super_class("a/B", "a/C"), None);
    }

    #[test]
    fn map_hierarchy_finds_nearest_common_ancestor() {
        let mut hierarchy = MapHierarchy::new();
        hierarchy
            .add("Base", "java/lang/Object")
            .add("Left", "Base")
            .add("Right", "Base")
            .add("LeftChild", "Left");

        assert_eq!(
            hierarchy.common_super_class("LeftChild", "Right").as_deref(),
            Some("Base")
        );
        assert_eq!(
            hierarchy.common_super_class("Left", "LeftChild").as_deref(),
            Some("Left")
        );
        assert_eq!(
            hierarchy.common_super_class("Left", "java/lang/Object").as_deref(),
            Some("java/lang/Object")
        );
        assert_eq!(hierarchy.common_super_class("Left", "Unknown"), None);
    }

    #[test]
    fn cycles_do_not_hang() {
        let mut hierarchy = MapHierarchy::new();
        hierarchy.add("A", "B").add("B", "A");
        assert_eq!(hierarchy.common_super_class("A", "C"), None);
    }
}
