//! Namespace importer: raw XML elements to [`Node`] trees.
//!
//! Every node records the reporting context it belongs to. A fact names it
//! directly through `contextRef`; anything nested inside a context or unit
//! (period components, explicit members, measures) inherits the nearest
//! ancestor `id`, so the flattened stream the merger works on still knows
//! where each node came from.

use crate::model::{Node, NodeKind};
use crate::parser::{Element, XmlDocument};
use compact_str::CompactString;
use log::debug;

pub fn import(doc: &XmlDocument) -> Node {
    let node = import_element(&doc.root, None);
    debug!(
        "imported <{}> with {} descendants",
        node.local_name,
        node.descendant_count()
    );
    node
}

fn import_element(element: &Element, inherited: Option<&str>) -> Node {
    let context = element
        .attr("contextRef")
        .or(inherited)
        .map(CompactString::from);

    let kind = match element.text.as_deref().map(str::trim) {
        Some(text) if !text.is_empty() => NodeKind::Fact {
            text: text.to_string(),
        },
        _ => NodeKind::Structural,
    };

    // A period carries no id of its own; its components resolve through it
    // to the enclosing context, which is what `inherited` already holds.
    let scope = element.attr("id").or(inherited);
    let children = element
        .children
        .iter()
        .map(|child| import_element(child, scope))
        .collect();

    Node {
        local_name: element.local_name.clone(),
        namespace: element.namespace.clone(),
        attributes: element.attributes.clone(),
        context,
        kind,
        children,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::Parser;

    fn imported(xml: &str) -> Node {
        import(&Parser::new().parse_str(xml).unwrap())
    }

    #[test]
    fn test_period_components_inherit_context_id() {
        let root = imported(
            r#"<xbrli:xbrl xmlns:xbrli="http://www.xbrl.org/2003/instance">
                 <xbrli:context id="C1">
                   <xbrli:period><xbrli:instant>2020-12-31</xbrli:instant></xbrli:period>
                 </xbrli:context>
               </xbrli:xbrl>"#,
        );
        let context = &root.children[0];
        assert_eq!(context.context, None);

        let period = &context.children[0];
        assert_eq!(period.context.as_deref(), Some("C1"));
        let instant = &period.children[0];
        assert_eq!(instant.context.as_deref(), Some("C1"));
        assert_eq!(instant.text(), Some("2020-12-31"));
    }

    #[test]
    fn test_fact_uses_context_ref() {
        let root = imported(
            r#"<xbrli:xbrl xmlns:xbrli="http://www.xbrl.org/2003/instance"
                           xmlns:us-gaap="http://fasb.org/us-gaap/2020-01-31">
                 <us-gaap:Assets contextRef="FY2020" decimals="-6">5</us-gaap:Assets>
               </xbrli:xbrl>"#,
        );
        let fact = &root.children[0];
        assert_eq!(fact.context.as_deref(), Some("FY2020"));
        assert_eq!(fact.text(), Some("5"));
        assert_eq!(
            fact.namespace.as_deref(),
            Some("http://fasb.org/us-gaap/2020-01-31")
        );
    }

    #[test]
    fn test_label_without_context_stays_unowned() {
        let root = imported(
            r#"<link:linkbase xmlns:link="http://www.xbrl.org/2003/linkbase"
                              xmlns:xlink="http://www.w3.org/1999/xlink">
                 <link:labelLink>
                   <link:label xlink:label="lab_Assets" xlink:role="http://www.xbrl.org/2003/role/label">Assets</link:label>
                 </link:labelLink>
               </link:linkbase>"#,
        );
        let label = &root.children[0].children[0];
        assert_eq!(label.context, None);
        assert_eq!(label.attr("label"), Some("lab_Assets"));
        assert_eq!(label.text(), Some("Assets"));
    }
}
