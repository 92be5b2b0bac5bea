//! Skill relevance filtering.
//!
//! Bots can carry many skills; sending all of them bloats the prompt. When a
//! candidate limit is configured, skills are ranked by word overlap with the
//! query and only the best ones are sent. Pinned skills always go through.

use std::collections::HashSet;

use flowgate_core::text::jaccard;
use flowgate_gateway::GatewaySkill;

fn is_token_char(c: char) -> bool {
    c.is_ascii_lowercase() || c.is_ascii_digit() || ('\u{4E00}'..='\u{9FFF}').contains(&c)
}

/// Lowercased maximal runs of ASCII letters, digits and CJK ideographs.
pub fn tokenize(text: &str) -> HashSet<String> {
    let lower = text.to_lowercase();
    lower
        .split(|c: char| !is_token_char(c))
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect()
}

/// Keep pinned skills plus the `limit` best-matching others overall.
///
/// Pinned skills come first in their original order, even if they alone
/// exceed `limit`. The input is returned unchanged when it already fits,
/// when `limit` is 0, or when the query has no tokens.
pub fn filter_relevant_skills(skills: Vec<GatewaySkill>, query: &str, limit: usize) -> Vec<GatewaySkill> {
    if limit == 0 || skills.len() <= limit || query.trim().is_empty() {
        return skills;
    }
    let query_tokens = tokenize(query);
    if query_tokens.is_empty() {
        return skills;
    }

    let (pinned, rest): (Vec<GatewaySkill>, Vec<GatewaySkill>) = skills.into_iter().partition(GatewaySkill::is_pinned);

    let mut scored: Vec<(f64, GatewaySkill)> = rest
        .into_iter()
        .map(|skill| {
            let tokens = tokenize(&format!("{} {}", skill.name, skill.description));
            (jaccard(&query_tokens, &tokens), skill)
        })
        .collect();
    scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));

    let slots = limit.saturating_sub(pinned.len());
    pinned
        .into_iter()
        .chain(scored.into_iter().take(slots).map(|(_, skill)| skill))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{Map, json};

    fn skill(name: &str, description: &str) -> GatewaySkill {
        GatewaySkill {
            name: name.into(),
            description: description.into(),
            content: String::new(),
            metadata: Map::new(),
        }
    }

    fn pinned(name: &str) -> GatewaySkill {
        let mut s = skill(name, "always on");
        s.metadata.insert("enabled".into(), json!(true));
        s
    }

    fn names(skills: &[GatewaySkill]) -> Vec<&str> {
        skills.iter().map(|s| s.name.as_str()).collect()
    }

    #[test]
    fn tokenizer_mixes_ascii_and_cjk_runs() {
        let tokens = tokenize("Deploy-v2 到生产环境, ASAP!");
        assert!(tokens.contains("deploy"));
        assert!(tokens.contains("v2"));
        assert!(tokens.contains("到生产环境"));
        assert!(tokens.contains("asap"));
        assert_eq!(tokens.len(), 4);
    }

    #[test]
    fn ranks_by_overlap_and_keeps_order_on_ties() {
        let skills = vec![
            skill("weather", "forecast lookup"),
            skill("git", "commit and push code"),
            skill("calendar", "meeting schedule"),
            skill("deploy", "push code to production"),
        ];
        let out = filter_relevant_skills(skills, "push my code to production", 2);
        assert_eq!(names(&out), vec!["deploy", "git"]);
    }

    #[test]
    fn pinned_skills_always_kept_even_beyond_limit() {
        let skills = vec![
            skill("git", "push code"),
            pinned("memory"),
            pinned("notes"),
            skill("deploy", "push code"),
        ];
        let out = filter_relevant_skills(skills, "push code", 1);
        assert_eq!(names(&out), vec!["memory", "notes"]);
    }

    #[test]
    fn unchanged_when_disabled_or_query_has_no_tokens() {
        let skills = vec![skill("a", "x"), skill("b", "y"), skill("c", "z")];
        assert_eq!(filter_relevant_skills(skills.clone(), "anything", 0), skills);
        assert_eq!(filter_relevant_skills(skills.clone(), "anything", 5), skills);
        assert_eq!(filter_relevant_skills(skills.clone(), "   ", 1), skills);
        assert_eq!(filter_relevant_skills(skills.clone(), "?!", 1), skills);
    }
}
