//! Fuzzy resolution of requested paths against the indexed file set.

use std::cmp::Ordering;

/// Ranks indexed paths as substitutes for a path that does not exist
#[derive(Debug, Clone)]
pub struct PathResolver {
    deprioritized: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Ranked {
    path: String,
    affinity: usize,
    penalty: usize,
    depth: usize,
}

impl Ranked {
    fn cmp_rank(&self, other: &Self) -> Ordering {
        other
            .affinity
            .cmp(&self.affinity)
            .then(self.penalty.cmp(&other.penalty))
            .then(self.depth.cmp(&other.depth))
            .then_with(|| self.path.cmp(&other.path))
    }
}

impl PathResolver {
    pub fn new(deprioritized: &[String]) -> Self {
        Self {
            deprioritized: deprioritized.iter().map(|s| s.to_lowercase()).collect(),
        }
    }

    /// Number of deprioritized directory segments in `path`
    pub fn penalty(&self, path: &str) -> usize {
        let lower = path.to_lowercase();
        let segments: Vec<&str> = lower.split('/').collect();
        let dirs = &segments[..segments.len().saturating_sub(1)];
        dirs.iter()
            .filter(|segment| self.deprioritized.iter().any(|d| d == *segment))
            .count()
    }

    /// Indexed paths that could be meant by `requested`, best first.
    ///
    /// Exact basename matches are preferred; same-stem matches with a different
    /// extension are used only when no basename matches. Ranking is directory
    /// affinity, then deprioritized-segment penalty, then depth, then lexical.
    pub fn resolve_candidates<'a, I>(&self, requested: &str, paths: I) -> Vec<String>
    where
        I: IntoIterator<Item = &'a str>,
    {
        self.ranked(requested, paths).into_iter().map(|r| r.path).collect()
    }

    /// The single best substitute, if it is clearly better than the runner-up
    pub fn best_match<'a, I>(&self, requested: &str, paths: I) -> Option<String>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let ranked = self.ranked(requested, paths);
        match ranked.as_slice() {
            [] => None,
            [only] => Some(only.path.clone()),
            [first, second, ..] => {
                let clear = first.affinity > second.affinity
                    || (first.affinity == second.affinity && first.penalty < second.penalty);
                clear.then(|| first.path.clone())
            }
        }
    }

    fn ranked<'a, I>(&self, requested: &str, paths: I) -> Vec<Ranked>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let requested = normalize(requested);
        let mut req_segments: Vec<String> = requested
            .to_lowercase()
            .split('/')
            .filter(|s| !s.is_empty())
            .map(|s| s.to_string())
            .collect();
        let Some(req_name) = req_segments.pop() else {
            return Vec::new();
        };
        let req_stem = stem(&req_name).to_string();

        let mut exact = Vec::new();
        let mut same_stem = Vec::new();
        for path in paths {
            let lower = path.to_lowercase();
            let mut segments: Vec<&str> = lower.split('/').collect();
            let Some(name) = segments.pop() else { continue };

            let bucket = if name == req_name {
                &mut exact
            } else if stem(name) == req_stem {
                &mut same_stem
            } else {
                continue;
            };

            let affinity = req_segments
                .iter()
                .filter(|seg| segments.contains(&seg.as_str()))
                .count();
            bucket.push(Ranked {
                path: path.to_string(),
                affinity,
                penalty: self.penalty(path),
                depth: segments.len(),
            });
        }

        let mut ranked = if exact.is_empty() { same_stem } else { exact };
        ranked.sort_by(|a, b| a.cmp_rank(b));
        ranked
    }
}

/// Forward slashes, no leading `./` or `/`
pub fn normalize(path: &str) -> String {
    let path = path.trim().replace('\\', "/");
    let mut path = path.as_str();
    loop {
        if let Some(rest) = path.strip_prefix("./") {
            path = rest;
        } else if let Some(rest) = path.strip_prefix('/') {
            path = rest;
        } else {
            break;
        }
    }
    path.to_string()
}

fn stem(name: &str) -> &str {
    name.split('.').next().unwrap_or(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resolver() -> PathResolver {
        PathResolver::new(&["legacy".to_string(), "static".to_string(), "dist".to_string()])
    }

    #[test]
    fn test_exact_basename_beats_stem() {
        let paths = ["src/pages/Home.tsx", "src/pages/Home.vue", "src/components/HomeCard.vue"];
        let r = resolver();
        assert_eq!(r.resolve_candidates("Home.vue", paths), vec!["src/pages/Home.vue"]);
        assert_eq!(r.best_match("Home.vue", paths).as_deref(), Some("src/pages/Home.vue"));
        assert_eq!(r.resolve_candidates("home.js", paths), vec!["src/pages/Home.tsx", "src/pages/Home.vue"]);
    }

    #[test]
    fn test_ranking_order() {
        let paths = [
            "src/legacy/static/login.ts",
            "src/services/auth/login.ts",
            "src/services/login.ts",
        ];
        let r = resolver();
        assert_eq!(
            r.resolve_candidates("login.ts", paths),
            vec!["src/services/login.ts", "src/services/auth/login.ts", "src/legacy/static/login.ts"]
        );
        assert_eq!(r.resolve_candidates("auth/login.ts", paths)[0], "src/services/auth/login.ts");
        assert_eq!(r.penalty("src/legacy/static/login.ts"), 2);
    }

    #[test]
    fn test_ambiguity_has_no_best_match() {
        let paths = ["src/a/index.ts", "src/b/index.ts"];
        assert!(resolver().best_match("index.ts", paths).is_none());
        assert_eq!(resolver().best_match("b/index.ts", paths).as_deref(), Some("src/b/index.ts"));
        assert!(resolver().best_match("missing.ts", paths).is_none());
    }

    #[test]
    fn test_normalize() {
        assert_eq!(normalize("./src\\pages/Home.vue"), "src/pages/Home.vue");
        assert_eq!(normalize("/src/x.ts"), "src/x.ts");
    }
}
