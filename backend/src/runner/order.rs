//! Execution order of the selected transformers.
//!
//! Requirements are edges from a transformer to the transformers it needs.
//! A depth-first walk emits every requirement before its dependent; ties
//! keep the input order.

use std::collections::{HashMap, HashSet};

use crate::error::{RunError, RunResult};
use crate::transformer::AdvancedTransformer;

/// Sort transformers so each one follows everything it requires.
///
/// Fails on duplicate names, on requirements outside `transformers`, and on
/// requirement cycles.
pub fn order(transformers: Vec<AdvancedTransformer>) -> RunResult<Vec<AdvancedTransformer>> {
    let mut index: HashMap<String, usize> = HashMap::new();
    for (i, t) in transformers.iter().enumerate() {
        if index.insert(t.name.clone(), i).is_some() {
            return Err(RunError::DuplicateTransformer(t.name.clone()));
        }
    }

    let mut walk = Walk {
        transformers: &transformers,
        index: &index,
        done: HashSet::new(),
        visiting: HashSet::new(),
        sorted: Vec::with_capacity(transformers.len()),
    };
    for i in 0..transformers.len() {
        walk.visit(i)?;
    }

    let sorted = walk.sorted;
    let mut slots: Vec<Option<AdvancedTransformer>> = transformers.into_iter().map(Some).collect();
    Ok(sorted.into_iter().filter_map(|i| slots[i].take()).collect())
}

struct Walk<'a> {
    transformers: &'a [AdvancedTransformer],
    index: &'a HashMap<String, usize>,
    done: HashSet<usize>,
    visiting: HashSet<usize>,
    sorted: Vec<usize>,
}

impl Walk<'_> {
    fn visit(&mut self, i: usize) -> RunResult<()> {
        if self.done.contains(&i) {
            return Ok(());
        }
        let transformer = &self.transformers[i];
        if !self.visiting.insert(i) {
            return Err(RunError::Cycle(transformer.name.clone()));
        }

        for requirement in &transformer.requirements {
            let &j = self.index.get(requirement).ok_or_else(|| RunError::MissingDependency {
                transformer: transformer.name.clone(),
                requirement: requirement.clone(),
            })?;
            self.visit(j)?;
        }

        self.visiting.remove(&i);
        self.done.insert(i);
        self.sorted.push(i);
        Ok(())
    }
}
