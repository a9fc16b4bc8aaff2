use super::MarkerNames;
use crate::il::{MethodDef, Module, TypeDef};

/// Why a method is left alone
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum ExcludeReason {
    /// Instance constructor or type initializer (never instrumented)
    Constructor,

    /// Abstract or extern method
    NoBody,

    /// Marked `ignore` inside an `instrument-all` type
    Ignored,

    /// Marked `ignore` even though nothing opted it in (reported as an anomaly)
    StrayIgnore,

    NotMarked,
}

#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum Decision {
    Include,
    Exclude(ExcludeReason),
}

/// Marker-driven choice of which methods get a preamble
pub struct SelectionPolicy<'a> {
    markers: &'a MarkerNames,
}

impl<'a> SelectionPolicy<'a> {
    pub fn new(markers: &'a MarkerNames) -> SelectionPolicy<'a> {
        SelectionPolicy { markers }
    }

    pub fn decide(&self, type_def: &TypeDef, method: &MethodDef) -> Decision {
        if method.is_constructor() {
            return Decision::Exclude(ExcludeReason::Constructor);
        }
        if method.body.is_none() {
            return Decision::Exclude(ExcludeReason::NoBody);
        }

        let ignored = method.has_marker(&self.markers.ignore);
        if type_def.has_marker(&self.markers.instrument_all) {
            if ignored {
                Decision::Exclude(ExcludeReason::Ignored)
            } else {
                Decision::Include
            }
        } else if method.has_marker(&self.markers.instrument) {
            Decision::Include
        } else if ignored {
            Decision::Exclude(ExcludeReason::StrayIgnore)
        } else {
            Decision::Exclude(ExcludeReason::NotMarked)
        }
    }
}

/// Position of a method inside a module
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub struct MethodPosition {
    pub type_index: usize,
    pub method_index: usize,
}

/// Methods of a module to instrument, in declaration order
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Selection {
    pub methods: Vec<MethodPosition>,

    /// Methods with a suspicious combination of markers (excluded)
    pub anomalies: Vec<MethodPosition>,
}

impl Selection {
    pub fn is_empty(&self) -> bool {
        self.methods.is_empty()
    }
}

pub fn select_methods(module: &Module, policy: &SelectionPolicy) -> Selection {
    let mut selection = Selection::default();
    for (type_index, type_def) in module.types.iter().enumerate() {
        for (method_index, method) in type_def.methods.iter().enumerate() {
            let position = MethodPosition {
                type_index,
                method_index,
            };
            match policy.decide(type_def, method) {
                Decision::Include => selection.methods.push(position),
                Decision::Exclude(ExcludeReason::StrayIgnore) => selection.anomalies.push(position),
                Decision::Exclude(_) => (),
            }
        }
    }
    selection
}
