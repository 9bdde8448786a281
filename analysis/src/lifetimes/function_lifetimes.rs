//! Inferred lifetime signatures of functions
//!
//! A [`FunctionLifetimes`] holds one lifetime tree per parameter, one for
//! the implicit `this` object of non-static methods, and one for the
//! return value. The printable form follows the annotation grammar:
//! comma-separated parameter groups, an optional `T:` prefix for `this`,
//! and an optional `-> R` return section, with nested reference layers as
//! parenthesized lists. Example: `a, b -> a`.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::ast::func::FunctionDecl;
use crate::ast::ids::LifetimeVarId;
use crate::ast::types::TypeArena;
use crate::ast::RecordId;
use crate::lifetimes::lifetime::Lifetime;
use crate::lifetimes::substitutions::LifetimeSubstitutions;
use crate::lifetimes::type_lifetimes::{ObjectLifetimes, ValueLifetimes};

/// The lifetime signature of one function
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionLifetimes {
    /// The pointee object of `this`, for non-static methods
    pub this_lifetimes: Option<ObjectLifetimes>,
    pub param_lifetimes: Vec<ValueLifetimes>,
    pub return_lifetimes: ValueLifetimes,
}

impl FunctionLifetimes {
    /// The skeleton signature for a declaration, one fresh lifetime per
    /// position
    pub fn for_decl(
        arena: &TypeArena,
        decl: &FunctionDecl,
        mint: &mut dyn FnMut() -> Lifetime,
    ) -> Self {
        let this_lifetimes = decl.this_record().map(|record| {
            let params = arena.record(record).lifetime_params.clone();
            ObjectLifetimes {
                lifetime: mint(),
                value: ValueLifetimes::Record(
                    params.into_iter().map(|name| (name, mint())).collect(),
                ),
            }
        });
        let param_lifetimes = decl
            .params
            .iter()
            .map(|param| ValueLifetimes::for_type(arena, param.ty, mint))
            .collect();
        let return_lifetimes = ValueLifetimes::for_type(arena, decl.return_ty, mint);
        Self {
            this_lifetimes,
            param_lifetimes,
            return_lifetimes,
        }
    }

    pub fn num_params(&self) -> usize {
        self.param_lifetimes.len()
    }

    pub fn param(&self, index: usize) -> &ValueLifetimes {
        &self.param_lifetimes[index]
    }

    /// Whether the shape matches a declaration (arity and `this`-ness)
    pub fn is_valid_for_decl(&self, decl: &FunctionDecl) -> bool {
        self.param_lifetimes.len() == decl.num_params()
            && self.this_lifetimes.is_some() == decl.this_record().is_some()
    }

    pub fn for_each_lifetime(&self, visit: &mut dyn FnMut(Lifetime)) {
        if let Some(this) = &self.this_lifetimes {
            this.for_each_lifetime(visit);
        }
        for param in &self.param_lifetimes {
            param.for_each_lifetime(visit);
        }
        self.return_lifetimes.for_each_lifetime(visit);
    }

    pub fn substitute(&mut self, subst: &LifetimeSubstitutions) {
        if let Some(this) = &mut self.this_lifetimes {
            this.substitute(subst);
        }
        for param in &mut self.param_lifetimes {
            param.substitute(subst);
        }
        self.return_lifetimes.substitute(subst);
    }

    /// Shape-preserving rewrite of every lifetime position
    pub fn map_lifetimes(&self, rewrite: &mut dyn FnMut(Lifetime) -> Lifetime) -> Self {
        Self {
            this_lifetimes: self
                .this_lifetimes
                .as_ref()
                .map(|this| this.map_lifetimes(rewrite)),
            param_lifetimes: self
                .param_lifetimes
                .iter()
                .map(|param| param.map_lifetimes(rewrite))
                .collect(),
            return_lifetimes: self.return_lifetimes.map_lifetimes(rewrite),
        }
    }

    /// Rewrite each distinct variable to a fresh lifetime, preserving
    /// sharing
    ///
    /// Signatures minted by different repositories reuse raw variable
    /// ids; renaming into a disjoint space keeps adaptation constraints
    /// from relating unrelated variables.
    pub fn rename_variables(&self, fresh: &mut dyn FnMut() -> Lifetime) -> Self {
        let mut renamed: HashMap<LifetimeVarId, Lifetime> = HashMap::new();
        self.map_lifetimes(&mut |lifetime| match lifetime {
            Lifetime::Variable(var) => *renamed.entry(var).or_insert_with(|| fresh()),
            concrete => concrete,
        })
    }

    /// The highest raw variable id appearing in the signature
    pub fn max_variable_id(&self) -> Option<u32> {
        let mut max = None;
        self.for_each_lifetime(&mut |lifetime| {
            if let Lifetime::Variable(var) = lifetime {
                max = Some(max.map_or(var.as_raw(), |m: u32| m.max(var.as_raw())));
            }
        });
        max
    }

    /// Re-shape this signature as seen through an overridden base method
    ///
    /// The override's `this` entry is re-keyed onto the base record's
    /// lifetime parameters, positionally; parameters the base record does
    /// not declare are dropped, missing ones take the object's own
    /// lifetime.
    pub fn for_overridden_method(&self, arena: &TypeArena, base_record: RecordId) -> Self {
        let mut reshaped = self.clone();
        if let Some(this) = &mut reshaped.this_lifetimes {
            let base_params = arena.record(base_record).lifetime_params.clone();
            let existing: Vec<Lifetime> = match &this.value {
                ValueLifetimes::Record(args) => args.iter().map(|(_, l)| *l).collect(),
                _ => Vec::new(),
            };
            let own = this.lifetime;
            this.value = ValueLifetimes::Record(
                base_params
                    .into_iter()
                    .enumerate()
                    .map(|(i, name)| (name, existing.get(i).copied().unwrap_or(own)))
                    .collect(),
            );
        }
        reshaped
    }

    /// The printable signature form
    pub fn signature_string(&self) -> String {
        let names = self.input_variable_names();
        let mut segments: Vec<String> = Vec::new();

        if let Some(this) = &self.this_lifetimes {
            let mut prefix = render_name(this.lifetime, &names);
            if let ValueLifetimes::Record(args) = &this.value {
                if !args.is_empty() {
                    let rendered: Vec<_> = args
                        .iter()
                        .map(|(_, l)| render_name(*l, &names))
                        .collect();
                    prefix.push_str(&format!(" ({})", rendered.join(", ")));
                }
            }
            prefix.push(':');
            segments.push(prefix);
        }

        if !self.param_lifetimes.is_empty() {
            let params: Vec<_> = self
                .param_lifetimes
                .iter()
                .map(|p| render_value(p, &names))
                .collect();
            segments.push(params.join(", "));
        }

        if !self.return_lifetimes.is_empty() {
            segments.push(format!(
                "-> {}",
                render_value(&self.return_lifetimes, &names)
            ));
        }

        segments.join(" ")
    }

    /// Letter names for every variable appearing in an input position
    /// (`this` or a parameter), in order of first appearance
    fn input_variable_names(&self) -> HashMap<LifetimeVarId, String> {
        let mut names = HashMap::new();
        let mut assign = |lifetime: Lifetime| {
            if let Lifetime::Variable(v) = lifetime {
                let next = names.len();
                names.entry(v).or_insert_with(|| letter_name(next));
            }
        };
        if let Some(this) = &self.this_lifetimes {
            this.for_each_lifetime(&mut assign);
        }
        for param in &self.param_lifetimes {
            param.for_each_lifetime(&mut assign);
        }
        names
    }
}

fn letter_name(index: usize) -> String {
    if index < 26 {
        ((b'a' + index as u8) as char).to_string()
    } else {
        format!("l{}", index)
    }
}

/// Render one lifetime; variables with no input name print as `_`
fn render_name(lifetime: Lifetime, names: &HashMap<LifetimeVarId, String>) -> String {
    match lifetime {
        Lifetime::Static => "static".to_string(),
        Lifetime::Local => "local".to_string(),
        Lifetime::Variable(v) => names.get(&v).cloned().unwrap_or_else(|| "_".to_string()),
    }
}

fn render_value(value: &ValueLifetimes, names: &HashMap<LifetimeVarId, String>) -> String {
    match value {
        ValueLifetimes::Scalar => "()".to_string(),
        ValueLifetimes::Pointer(_) => {
            let mut chain = Vec::new();
            let mut cursor = value;
            while let ValueLifetimes::Pointer(pointee) = cursor {
                chain.push(render_name(pointee.lifetime, names));
                cursor = &pointee.value;
            }
            if let ValueLifetimes::Record(args) = cursor {
                for (_, lifetime) in args {
                    chain.push(render_name(*lifetime, names));
                }
            }
            if chain.len() == 1 {
                chain.pop().unwrap_or_default()
            } else {
                format!("({})", chain.join(", "))
            }
        }
        ValueLifetimes::Record(args) => {
            if args.is_empty() {
                "()".to_string()
            } else {
                let rendered: Vec<_> =
                    args.iter().map(|(_, l)| render_name(*l, names)).collect();
                format!("({})", rendered.join(", "))
            }
        }
    }
}

impl fmt::Display for FunctionLifetimes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.signature_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::ids::LifetimeVarId;

    fn v(raw: u32) -> Lifetime {
        Lifetime::Variable(LifetimeVarId::from_raw(raw))
    }

    fn ptr(lifetime: Lifetime) -> ValueLifetimes {
        ValueLifetimes::Pointer(Box::new(ObjectLifetimes {
            lifetime,
            value: ValueLifetimes::Scalar,
        }))
    }

    #[test]
    fn independent_params_disconnected_return() {
        let lifetimes = FunctionLifetimes {
            this_lifetimes: None,
            param_lifetimes: vec![ptr(v(0)), ptr(v(1)), ValueLifetimes::Scalar],
            return_lifetimes: ptr(v(2)),
        };
        assert_eq!(lifetimes.signature_string(), "a, b, () -> _");
    }

    #[test]
    fn return_tied_to_first_param() {
        let lifetimes = FunctionLifetimes {
            this_lifetimes: None,
            param_lifetimes: vec![ptr(v(0)), ptr(v(1))],
            return_lifetimes: ptr(v(0)),
        };
        assert_eq!(lifetimes.signature_string(), "a, b -> a");
    }

    #[test]
    fn this_prefix_and_nested_return() {
        let inner = ObjectLifetimes {
            lifetime: v(0),
            value: ValueLifetimes::Scalar,
        };
        let nested = ValueLifetimes::Pointer(Box::new(ObjectLifetimes {
            lifetime: v(0),
            value: ValueLifetimes::Pointer(Box::new(inner)),
        }));
        let lifetimes = FunctionLifetimes {
            this_lifetimes: Some(ObjectLifetimes {
                lifetime: v(0),
                value: ValueLifetimes::Record(Vec::new()),
            }),
            param_lifetimes: vec![ptr(v(1)), ptr(v(2))],
            return_lifetimes: nested,
        };
        assert_eq!(lifetimes.signature_string(), "a: b, c -> (a, a)");
    }

    #[test]
    fn void_return_is_omitted() {
        let lifetimes = FunctionLifetimes {
            this_lifetimes: None,
            param_lifetimes: vec![ptr(v(0))],
            return_lifetimes: ValueLifetimes::Scalar,
        };
        assert_eq!(lifetimes.signature_string(), "a");
    }

    #[test]
    fn static_and_local_print_by_name() {
        let lifetimes = FunctionLifetimes {
            this_lifetimes: None,
            param_lifetimes: vec![ptr(v(0))],
            return_lifetimes: ptr(Lifetime::Static),
        };
        assert_eq!(lifetimes.signature_string(), "a -> static");

        let leaky = FunctionLifetimes {
            this_lifetimes: None,
            param_lifetimes: vec![],
            return_lifetimes: ptr(Lifetime::Local),
        };
        assert_eq!(leaky.signature_string(), "-> local");
    }
}
