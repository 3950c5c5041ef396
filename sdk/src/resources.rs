use kioku_core::model::{Entity, Relationship};

/// Renders the `memories/{date}` resource: the raw markdown for that
/// date, or a sentinel when nothing was saved (`service.py::
/// read_memory_resource`).
pub fn memory_resource_text(date: &str, content: Option<String>) -> String {
    content.unwrap_or_else(|| format!("No memories found for date {}.", date))
}

/// Renders the `entities/{name}` resource: a profile built from a 2-hop
/// traversal around `entity`, grounded on `service.py::
/// read_entity_resource`.
pub fn entity_profile_text(entity: &str, nodes: &[Entity], edges: &[Relationship]) -> String {
    if nodes.is_empty() {
        return format!("Entity '{}' not found in the knowledge graph.", entity);
    }

    let root = nodes
        .iter()
        .find(|n| n.name.to_lowercase() == entity.to_lowercase())
        .unwrap_or(&nodes[0]);

    let mut out = vec![
        format!("# Entity Profile: {} ({})", root.name, root.entity_type),
        format!("- **First mentioned:** {}", root.first_seen),
        format!("- **Last mentioned:** {}", root.last_seen),
        format!("- **Total mentions:** {}", root.mention_count),
        String::new(),
        "## Known Relationships".to_string(),
    ];

    if edges.is_empty() {
        out.push("No known relationships.".to_string());
    } else {
        for edge in edges {
            let strength = if edge.weight >= 0.8 {
                "Strongly"
            } else if edge.weight >= 0.5 {
                "Moderately"
            } else {
                "Weakly"
            };
            out.push(format!(
                "- **{} {}** to `{}`",
                strength,
                edge.rel_type.to_string().to_lowercase(),
                edge.target_name
            ));
            if !edge.evidence.is_empty() {
                out.push(format!("  > *\"{}\"*", edge.evidence));
            }
        }
    }

    out.push(String::new());
    out.push("These details are generated from traversing the knowledge graph memory.".to_string());
    out.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use kioku_core::model::{ContentHash, EntityType, RelationshipType};

    #[test]
    fn memory_resource_falls_back_to_sentinel_when_absent() {
        let text = memory_resource_text("2024-01-01", None);
        assert_eq!(text, "No memories found for date 2024-01-01.");
    }

    #[test]
    fn entity_profile_reports_sentinel_for_unknown_entity() {
        let text = entity_profile_text("Nobody", &[], &[]);
        assert!(text.contains("not found"));
    }

    #[test]
    fn entity_profile_labels_relationship_strength() {
        let root = Entity::first_mention("Linh", EntityType::Person, "2024-01-01");
        let edge = Relationship {
            source_name: "Linh".to_string(),
            target_name: "Hanoi".to_string(),
            rel_type: RelationshipType::Topical,
            weight: 0.9,
            evidence: "Linh lives in Hanoi".to_string(),
            event_date: None,
            source_hash: ContentHash::of("x"),
        };
        let text = entity_profile_text("Linh", &[root], &[edge]);
        assert!(text.contains("Strongly topical"));
        assert!(text.contains("Linh lives in Hanoi"));
    }
}
