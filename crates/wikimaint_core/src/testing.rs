use std::collections::{BTreeMap, BTreeSet};
use std::io::Write;

use anyhow::{Result, bail};
use serde_json::{Value, json};

use crate::mediawiki::{EditResult, WikiReadApi, WikiWriteApi};

/// In-memory wiki used by the batch-operation tests.
#[derive(Debug, Default)]
pub struct MockApi {
    pub pages: BTreeMap<String, String>,
    pub namespaces: BTreeMap<String, i32>,
    pub categories: BTreeMap<String, Vec<String>>,
    pub file_urls: BTreeMap<String, String>,
    pub url_bodies: BTreeMap<String, Vec<u8>>,
    pub edits: Vec<(String, String, String)>,
    pub moves: Vec<(String, String, String, bool)>,
    pub deletes: Vec<(String, String)>,
    pub actions: Vec<(String, Vec<(String, String)>)>,
    pub failing_titles: BTreeSet<String>,
    pub logged_in: bool,
    pub requests: usize,
}

impl MockApi {
    pub fn with_page(mut self, title: &str, namespace: i32, content: &str) -> Self {
        self.pages.insert(title.to_string(), content.to_string());
        self.namespaces.insert(title.to_string(), namespace);
        self
    }

    pub fn fail_on(mut self, title: &str) -> Self {
        self.failing_titles.insert(title.to_string());
        self
    }

    fn check(&mut self, title: &str) -> Result<()> {
        self.requests += 1;
        if self.failing_titles.contains(title) {
            bail!("simulated API failure for {title}");
        }
        Ok(())
    }
}

impl WikiReadApi for MockApi {
    fn get_all_pages(&mut self, namespace: i32) -> Result<Vec<String>> {
        self.requests += 1;
        Ok(self
            .namespaces
            .iter()
            .filter(|(_, ns)| **ns == namespace)
            .map(|(title, _)| title.clone())
            .collect())
    }

    fn get_category_members(
        &mut self,
        category: &str,
        namespace: Option<i32>,
    ) -> Result<Vec<String>> {
        self.requests += 1;
        let members = self.categories.get(category).cloned().unwrap_or_default();
        Ok(members
            .into_iter()
            .filter(|title| match namespace {
                Some(namespace) => self.namespaces.get(title) == Some(&namespace),
                None => true,
            })
            .collect())
    }

    fn get_page_text(&mut self, title: &str) -> Result<Option<String>> {
        self.check(title)?;
        Ok(self.pages.get(title).cloned())
    }

    fn page_exists(&mut self, title: &str) -> Result<bool> {
        self.check(title)?;
        Ok(self.pages.contains_key(title))
    }

    fn get_file_url(&mut self, file_name: &str) -> Result<Option<String>> {
        self.check(file_name)?;
        Ok(self.file_urls.get(file_name).cloned())
    }

    fn fetch_url(&mut self, url: &str, sink: &mut dyn Write) -> Result<u64> {
        self.check(url)?;
        let Some(body) = self.url_bodies.get(url) else {
            bail!("download of {url} failed with HTTP 404 Not Found");
        };
        sink.write_all(body)?;
        Ok(body.len() as u64)
    }

    fn request_count(&self) -> usize {
        self.requests
    }
}

impl WikiWriteApi for MockApi {
    fn login(&mut self, _username: &str, _password: &str) -> Result<()> {
        self.logged_in = true;
        Ok(())
    }

    fn logout(&mut self) -> Result<()> {
        self.logged_in = false;
        Ok(())
    }

    fn edit_page(&mut self, title: &str, content: &str, summary: &str) -> Result<EditResult> {
        self.check(title)?;
        let nochange = self.pages.get(title).map(String::as_str) == Some(content);
        self.pages.insert(title.to_string(), content.to_string());
        self.edits
            .push((title.to_string(), content.to_string(), summary.to_string()));
        Ok(EditResult {
            title: title.to_string(),
            nochange,
            new_revision_id: (!nochange).then_some(self.edits.len() as i64),
        })
    }

    fn move_page(&mut self, from: &str, to: &str, reason: &str, no_redirect: bool) -> Result<()> {
        self.check(from)?;
        let Some(content) = self.pages.remove(from) else {
            bail!("MediaWiki API error [missingtitle]: The page you specified doesn't exist.");
        };
        let namespace = self.namespaces.remove(from).unwrap_or(0);
        if !no_redirect {
            self.pages
                .insert(from.to_string(), format!("#REDIRECT [[{to}]]"));
            self.namespaces.insert(from.to_string(), namespace);
        }
        self.pages.insert(to.to_string(), content);
        self.namespaces.insert(to.to_string(), namespace);
        self.moves.push((
            from.to_string(),
            to.to_string(),
            reason.to_string(),
            no_redirect,
        ));
        Ok(())
    }

    fn delete_page(&mut self, title: &str, reason: &str) -> Result<()> {
        self.check(title)?;
        self.pages.remove(title);
        self.namespaces.remove(title);
        self.deletes.push((title.to_string(), reason.to_string()));
        Ok(())
    }

    fn post_action(&mut self, action: &str, params: &[(&str, String)]) -> Result<Value> {
        if let Some((_, title)) = params.iter().find(|(key, _)| *key == "title") {
            self.check(title)?;
        } else {
            self.requests += 1;
        }
        self.actions.push((
            action.to_string(),
            params
                .iter()
                .map(|(key, value)| ((*key).to_string(), value.clone()))
                .collect(),
        ));
        Ok(json!({ "action": action, "result": "Success" }))
    }
}
