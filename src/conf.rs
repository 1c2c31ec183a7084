//! The job configuration handed down by the host at task start.

use std::collections::HashMap;

use errors::*;

/// Property names that exist under two historical naming schemes. When a
/// configuration arrives with only one name of a pair set, the other is
/// filled in at construction so lookups under either name succeed.
const ALIASED_KEYS: &[(&str, &str)] = &[
    ("mapred.job.id", "mapreduce.job.id"),
    ("mapred.jar", "mapreduce.job.jar"),
    ("mapred.job.name", "mapreduce.job.name"),
    ("mapred.task.id", "mapreduce.task.attempt.id"),
    ("mapred.tip.id", "mapreduce.task.id"),
    ("mapred.task.partition", "mapreduce.task.partition"),
    ("mapred.map.tasks", "mapreduce.job.maps"),
    ("mapred.reduce.tasks", "mapreduce.job.reduces"),
    ("mapred.input.dir", "mapreduce.input.fileinputformat.inputdir"),
    ("mapred.output.dir", "mapreduce.output.fileoutputformat.outputdir"),
    ("mapred.work.output.dir", "mapreduce.task.output.dir"),
];

/// An order-preserving string-to-string property map with typed getters.
///
/// Built once per task from the flat key/value list the host sends;
/// immutable afterwards.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct JobConf {
    entries: HashMap<String, String>,
    order: Vec<String>,
}

impl JobConf {
    /// Builds a configuration from a flat `[k1, v1, k2, v2, ...]` sequence.
    /// An odd-length sequence cannot be paired up and is rejected.
    pub fn new(flat: Vec<String>) -> Result<JobConf> {
        if flat.len() % 2 != 0 {
            bail!(ErrorKind::Config(format!(
                "flat configuration list has odd length {}",
                flat.len()
            )));
        }
        let mut conf = JobConf::default();
        let mut items = flat.into_iter();
        while let (Some(key), Some(value)) = (items.next(), items.next()) {
            conf.insert(key, value);
        }
        conf.mirror_aliased_keys();
        Ok(conf)
    }

    fn insert(&mut self, key: String, value: String) {
        if !self.entries.contains_key(&key) {
            self.order.push(key.clone());
        }
        self.entries.insert(key, value);
    }

    fn mirror_aliased_keys(&mut self) {
        let mut additions: Vec<(String, String)> = Vec::new();
        for &(legacy, current) in ALIASED_KEYS {
            if let Some(value) = self.entries.get(legacy) {
                if !self.entries.contains_key(current) {
                    additions.push((current.to_owned(), value.clone()));
                }
            }
            if let Some(value) = self.entries.get(current) {
                if !self.entries.contains_key(legacy) {
                    additions.push((legacy.to_owned(), value.clone()));
                }
            }
        }
        for (key, value) in additions {
            self.insert(key, value);
        }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(|value| value.as_str())
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Keys in first-seen order.
    pub fn keys(&self) -> ::std::slice::Iter<String> {
        self.order.iter()
    }

    /// `(key, value)` pairs in first-seen key order.
    pub fn pairs(&self) -> Vec<(&str, &str)> {
        self.order
            .iter()
            .map(|key| (key.as_str(), self.entries[key.as_str()].as_str()))
            .collect()
    }

    pub fn get_int(&self, key: &str) -> Result<i64> {
        let raw = self.require(key)?;
        raw.trim().parse().chain_err(|| {
            format!("configuration key {} holds invalid integer {:?}", key, raw)
        })
    }

    /// Like `get_int`, but a missing key yields `default`. A key that is
    /// present with an unparsable value is still an error.
    pub fn get_int_or(&self, key: &str, default: i64) -> Result<i64> {
        match self.get(key) {
            Some(raw) => raw.trim().parse().chain_err(|| {
                format!("configuration key {} holds invalid integer {:?}", key, raw)
            }),
            None => Ok(default),
        }
    }

    pub fn get_float(&self, key: &str) -> Result<f64> {
        let raw = self.require(key)?;
        raw.trim().parse().chain_err(|| {
            format!("configuration key {} holds invalid float {:?}", key, raw)
        })
    }

    pub fn get_float_or(&self, key: &str, default: f64) -> Result<f64> {
        match self.get(key) {
            Some(raw) => raw.trim().parse().chain_err(|| {
                format!("configuration key {} holds invalid float {:?}", key, raw)
            }),
            None => Ok(default),
        }
    }

    /// Only case-insensitive "true" and "false" are recognized booleans.
    pub fn get_bool(&self, key: &str) -> Result<bool> {
        let raw = self.require(key)?;
        match parse_bool(raw) {
            Some(value) => Ok(value),
            None => Err(
                ErrorKind::Config(format!(
                    "configuration key {} holds invalid boolean {:?}",
                    key,
                    raw
                )).into(),
            ),
        }
    }

    /// A missing key or an unrecognized boolean string falls back to the
    /// default. This mirrors the host-side getter, which treats the default
    /// as the answer for anything it cannot parse.
    pub fn get_bool_or(&self, key: &str, default: bool) -> bool {
        match self.get(key) {
            Some(raw) => parse_bool(raw).unwrap_or(default),
            None => default,
        }
    }

    fn require(&self, key: &str) -> Result<&str> {
        self.get(key).ok_or_else(|| {
            ErrorKind::Config(format!("missing configuration key {}", key)).into()
        })
    }
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_lowercase().as_str() {
        "true" => Some(true),
        "false" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn flat(pairs: &[(&str, &str)]) -> Vec<String> {
        let mut out = Vec::new();
        for &(key, value) in pairs {
            out.push(key.to_owned());
            out.push(value.to_owned());
        }
        out
    }

    #[test]
    fn round_trip_preserves_pairs_and_order() {
        let conf = JobConf::new(flat(&[("zebra", "1"), ("apple", "2"), ("mango", "3")])).unwrap();
        assert_eq!(Some("1"), conf.get("zebra"));
        assert_eq!(Some("2"), conf.get("apple"));
        assert_eq!(Some("3"), conf.get("mango"));
        let keys: Vec<&String> = conf.keys().collect();
        assert_eq!(vec!["zebra", "apple", "mango"], keys);
        assert_eq!(
            vec![("zebra", "1"), ("apple", "2"), ("mango", "3")],
            conf.pairs()
        );
    }

    #[test]
    fn odd_length_list_is_rejected() {
        assert!(JobConf::new(vec!["only-a-key".to_owned()]).is_err());
    }

    #[test]
    fn duplicate_keys_keep_last_value_and_first_position() {
        let conf = JobConf::new(flat(&[("a", "1"), ("b", "2"), ("a", "3")])).unwrap();
        assert_eq!(Some("3"), conf.get("a"));
        let keys: Vec<&String> = conf.keys().collect();
        assert_eq!(vec!["a", "b"], keys);
    }

    #[test]
    fn legacy_keys_are_mirrored_to_current_names() {
        let conf = JobConf::new(flat(&[("mapred.task.partition", "7")])).unwrap();
        assert_eq!(Some("7"), conf.get("mapreduce.task.partition"));
    }

    #[test]
    fn current_keys_are_mirrored_to_legacy_names() {
        let conf = JobConf::new(flat(&[("mapreduce.job.reduces", "4")])).unwrap();
        assert_eq!(Some("4"), conf.get("mapred.reduce.tasks"));
    }

    #[test]
    fn mirroring_does_not_overwrite_an_existing_alias() {
        let conf = JobConf::new(flat(&[
            ("mapred.job.name", "legacy"),
            ("mapreduce.job.name", "current"),
        ])).unwrap();
        assert_eq!(Some("legacy"), conf.get("mapred.job.name"));
        assert_eq!(Some("current"), conf.get("mapreduce.job.name"));
    }

    #[test]
    fn every_known_alias_pair_mirrors_both_ways() {
        for &(legacy, current) in ALIASED_KEYS {
            let conf = JobConf::new(flat(&[(legacy, "x")])).unwrap();
            assert_eq!(Some("x"), conf.get(current), "legacy -> current: {}", legacy);
            let conf = JobConf::new(flat(&[(current, "y")])).unwrap();
            assert_eq!(Some("y"), conf.get(legacy), "current -> legacy: {}", current);
        }
    }

    #[test]
    fn get_bool_recognizes_case_insensitive_literals() {
        let conf = JobConf::new(flat(&[
            ("a", "true"),
            ("b", "TRUE"),
            ("c", "True"),
            ("d", "false"),
            ("e", "FALSE"),
        ])).unwrap();
        assert_eq!(true, conf.get_bool("a").unwrap());
        assert_eq!(true, conf.get_bool("b").unwrap());
        assert_eq!(true, conf.get_bool("c").unwrap());
        assert_eq!(false, conf.get_bool("d").unwrap());
        assert_eq!(false, conf.get_bool("e").unwrap());
    }

    #[test]
    fn get_bool_without_default_rejects_garbage() {
        let conf = JobConf::new(flat(&[("flag", "yes")])).unwrap();
        assert!(conf.get_bool("flag").is_err());
        assert!(conf.get_bool("missing").is_err());
    }

    #[test]
    fn get_bool_with_default_falls_back_on_garbage() {
        let conf = JobConf::new(flat(&[("flag", "yes")])).unwrap();
        assert_eq!(true, conf.get_bool_or("flag", true));
        assert_eq!(false, conf.get_bool_or("flag", false));
        assert_eq!(true, conf.get_bool_or("missing", true));
    }

    #[test]
    fn numeric_getters() {
        let conf = JobConf::new(flat(&[("n", " 42 "), ("f", "0.25"), ("bad", "x")])).unwrap();
        assert_eq!(42, conf.get_int("n").unwrap());
        assert_eq!(0.25, conf.get_float("f").unwrap());
        assert!(conf.get_int("bad").is_err());
        assert!(conf.get_int("missing").is_err());
        assert_eq!(9, conf.get_int_or("missing", 9).unwrap());
        assert!(conf.get_int_or("bad", 9).is_err());
    }
}
