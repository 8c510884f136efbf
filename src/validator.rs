// Structural checks on a merged filing
use crate::contexts::ContextDictionary;
use crate::model::{FactTree, Node, OtherTree, QName};
use crate::{Error, Result};
use ahash::AHashMap;
use compact_str::CompactString;
use log::warn;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    DuplicateSibling { concept: CompactString, node: QName },
    AxisMarkerOutsideConcept { marker: CompactString },
    UnplacedFact { node: QName, context: CompactString },
    MissingPeriod { concept: CompactString, context: CompactString },
}

pub struct TreeValidator {
    strict_mode: bool,
    check_duplicates: bool,
    check_markers: bool,
    check_placement: bool,
    check_periods: bool,
}

impl TreeValidator {
    pub fn new() -> Self {
        Self {
            strict_mode: false,
            check_duplicates: true,
            check_markers: true,
            check_placement: true,
            check_periods: false,
        }
    }

    pub fn strict(mut self) -> Self {
        self.strict_mode = true;
        self.check_periods = true;
        self
    }

    pub fn with_period_check(mut self, enabled: bool) -> Self {
        self.check_periods = enabled;
        self
    }

    pub fn validate(
        &self,
        tree: &FactTree,
        other: &OtherTree,
        contexts: &ContextDictionary,
    ) -> Result<Vec<ValidationError>> {
        let mut validation_errors = Vec::new();

        if self.check_duplicates {
            validation_errors.extend(self.check_duplicate_siblings(tree));
        }

        if self.check_markers {
            validation_errors.extend(self.check_axis_markers(tree, other));
        }

        // Facts left in the contextual tree despite a usable context
        if self.check_placement {
            validation_errors.extend(self.check_unplaced_facts(other, contexts));
        }

        if self.check_periods {
            validation_errors.extend(self.check_fact_periods(tree, contexts));
        }

        for error in &validation_errors {
            warn!("validation: {:?}", error);
        }

        if self.strict_mode && !validation_errors.is_empty() {
            return Err(Error::Validation(format!(
                "Validation failed with {} errors",
                validation_errors.len()
            )));
        }

        Ok(validation_errors)
    }

    fn check_duplicate_siblings(&self, tree: &FactTree) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        for concept in tree.iter() {
            let mut groups: Vec<&[Node]> = vec![concept.children.as_slice()];
            groups.extend(
                concept
                    .children
                    .iter()
                    .filter(|n| n.is_axis_marker())
                    .map(|n| n.children.as_slice()),
            );

            for siblings in groups {
                // Bucket by name and context before the pairwise comparison
                let mut buckets: AHashMap<(&str, Option<&str>), Vec<&Node>> = AHashMap::new();
                for node in siblings {
                    let bucket = buckets
                        .entry((node.local_name.as_str(), node.context.as_deref()))
                        .or_default();
                    if bucket.iter().any(|seen| seen.same_structure(node)) {
                        errors.push(ValidationError::DuplicateSibling {
                            concept: concept.name.clone(),
                            node: node.qname(),
                        });
                    } else {
                        bucket.push(node);
                    }
                }
            }
        }

        errors
    }

    fn check_axis_markers(&self, tree: &FactTree, other: &OtherTree) -> Vec<ValidationError> {
        let mut errors = Vec::new();
        let mut nested = |node: &Node| {
            if node.is_axis_marker() {
                errors.push(ValidationError::AxisMarkerOutsideConcept {
                    marker: node.local_name.clone(),
                });
            }
        };

        // Markers sit directly under a concept root and nowhere else
        for concept in tree.iter() {
            for child in &concept.children {
                for grandchild in &child.children {
                    grandchild.walk(&mut nested);
                }
            }
        }
        for node in other.nodes() {
            node.walk(&mut nested);
        }

        errors
    }

    fn check_unplaced_facts(
        &self,
        other: &OtherTree,
        contexts: &ContextDictionary,
    ) -> Vec<ValidationError> {
        other
            .nodes()
            .filter_map(|node| {
                let context = node.context_ref()?;
                contexts
                    .date(context)
                    .map(|_| ValidationError::UnplacedFact {
                        node: node.qname(),
                        context: CompactString::from(context),
                    })
            })
            .collect()
    }

    fn check_fact_periods(&self, tree: &FactTree, contexts: &ContextDictionary) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        for concept in tree.iter() {
            for child in &concept.children {
                child.walk(&mut |node| {
                    if let Some(context) = node.context_ref() {
                        if contexts.date(context).is_none() {
                            errors.push(ValidationError::MissingPeriod {
                                concept: concept.name.clone(),
                                context: CompactString::from(context),
                            });
                        }
                    }
                });
            }
        }

        errors
    }
}

impl Default for TreeValidator {
    fn default() -> Self {
        Self::new()
    }
}
