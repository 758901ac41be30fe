use crate::api::JobApi;
use crate::errors::DeckError;
use crate::logging::append_run_log;
use crate::types::{JobId, Outcome, SkillTag, TagCategory};
use crate::view::TagCollection;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::BTreeSet;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagReport {
    pub subject: String,
    pub category: Option<TagCategory>,
    pub outcome: Outcome,
    pub error_message: Option<String>,
}

impl TagReport {
    fn success(subject: &str, category: Option<TagCategory>) -> Self {
        Self {
            subject: subject.to_string(),
            category,
            outcome: Outcome::Success,
            error_message: None,
        }
    }

    fn failure(subject: &str, category: Option<TagCategory>, err: &DeckError) -> Self {
        Self {
            subject: subject.to_string(),
            category,
            outcome: Outcome::Failure,
            error_message: Some(err.message()),
        }
    }
}

/// The selected job's skill tags and the terms hidden this session.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TagClassifier {
    job_id: Option<JobId>,
    tags: Vec<SkillTag>,
    hidden: BTreeSet<String>,
}

impl TagClassifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn load(&mut self, job_id: JobId, tags: Vec<SkillTag>) {
        self.job_id = Some(job_id);
        self.tags = tags;
    }

    pub fn clear(&mut self) {
        self.job_id = None;
        self.tags.clear();
    }

    pub fn job_id(&self) -> Option<&JobId> {
        self.job_id.as_ref()
    }

    fn is_visible(&self, tag: &SkillTag) -> bool {
        !self.hidden.contains(&tag.name.to_lowercase())
    }

    pub fn in_category(&self, category: TagCategory) -> Vec<&SkillTag> {
        self.tags
            .iter()
            .filter(|tag| tag.category == category && self.is_visible(tag))
            .collect()
    }

    pub fn unsorted(&self) -> Vec<&SkillTag> {
        self.in_category(TagCategory::Unsorted)
    }

    /// Every visible tag regardless of category, as shown in the review chips.
    pub fn chips(&self) -> Vec<&SkillTag> {
        self.tags.iter().filter(|tag| self.is_visible(tag)).collect()
    }

    pub fn collection(&self, collection: TagCollection) -> Vec<&SkillTag> {
        match collection {
            TagCollection::Unsorted => self.unsorted(),
            TagCollection::Chips => self.chips(),
            TagCollection::None => Vec::new(),
        }
    }

    pub fn collection_len(&self, collection: TagCollection) -> usize {
        self.collection(collection).len()
    }

    /// Moves an unsorted tag into `category`. The local change lands first and
    /// is undone when the remote call fails.
    pub fn harvest(
        &mut self,
        api: &dyn JobApi,
        job_id: &JobId,
        name: &str,
        category: TagCategory,
    ) -> Result<TagReport, DeckError> {
        if !category.is_sorted() {
            return Err(DeckError::Input(format!(
                "tags cannot be harvested into {}",
                category.as_str()
            )));
        }
        if self.job_id.as_ref() != Some(job_id) {
            return Err(DeckError::NotFound(format!("tags for job {job_id} are not loaded")));
        }
        let hidden = &self.hidden;
        let index = self
            .tags
            .iter()
            .position(|tag| {
                tag.name == name
                    && tag.category == TagCategory::Unsorted
                    && !hidden.contains(&tag.name.to_lowercase())
            })
            .ok_or_else(|| {
                DeckError::NotFound(format!("tag {name} is not unsorted for job {job_id}"))
            })?;

        self.tags[index].category = category;
        match api
            .harvest_tag(job_id, name, category)
            .and_then(|reply| reply.into_result())
        {
            Ok(_) => {
                append_run_log(
                    "info",
                    "tags.harvested",
                    json!({ "job_id": job_id.as_str(), "tag": name, "category": category.as_str() }),
                );
                Ok(TagReport::success(name, Some(category)))
            }
            Err(err) => {
                self.tags[index].category = TagCategory::Unsorted;
                if !err.is_remote_failure() {
                    return Err(err);
                }
                append_run_log(
                    "error",
                    "tags.harvest.remote_failure",
                    json!({ "job_id": job_id.as_str(), "tag": name, "error": err.to_string() }),
                );
                Ok(TagReport::failure(name, Some(category), &err))
            }
        }
    }

    /// Adds `term` to the exclusion list and hides matching tags locally.
    pub fn reject(&mut self, api: &dyn JobApi, term: &str) -> Result<TagReport, DeckError> {
        let term = term.trim();
        if term.is_empty() {
            return Err(DeckError::Input("cannot reject a blank term".to_string()));
        }
        let key = term.to_lowercase();
        let newly_hidden = self.hidden.insert(key.clone());

        match api.reject(term).and_then(|reply| reply.into_result()) {
            Ok(_) => {
                append_run_log("info", "tags.rejected", json!({ "term": key }));
                Ok(TagReport::success(term, None))
            }
            Err(err) => {
                if newly_hidden {
                    self.hidden.remove(&key);
                }
                if !err.is_remote_failure() {
                    return Err(err);
                }
                append_run_log(
                    "error",
                    "tags.reject.remote_failure",
                    json!({ "term": key, "error": err.to_string() }),
                );
                Ok(TagReport::failure(term, None, &err))
            }
        }
    }
}
