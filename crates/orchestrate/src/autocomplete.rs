use futures::StreamExt;
use query_pipeline::{timed, Backend, BackendError, Config, Pipeline, ResultList};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

#[derive(Debug, clap::Args)]
pub struct Args {
    /// Path to a YAML autocomplete script.
    /// Run `spec autocomplete` to see its JSON schema.
    #[clap(long)]
    pub script: std::path::PathBuf,
}

/// Script of typed queries, and of the backend's responses to them.
#[derive(Debug, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct Script {
    /// # Stages of the pipeline.
    #[serde(default)]
    pub pipeline: Config,
    /// # Values searched by the backend.
    /// Defaults to a catalog of bright stars.
    #[serde(default = "bright_stars")]
    pub catalog: Vec<String>,
    /// # Queries, and when they're typed.
    pub inputs: Vec<Input>,
    /// # When typing stops.
    /// Defaults to the offset of the last input.
    #[serde(default, with = "humantime_serde")]
    #[schemars(with = "Option<String>")]
    pub complete_at: Option<Duration>,
    /// # Responses of successive backend calls.
    /// Calls beyond the scripted responses are answered without delay.
    #[serde(default)]
    pub responses: Vec<Response>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct Input {
    /// # Offset from the start of the script.
    #[serde(with = "humantime_serde")]
    #[schemars(with = "String")]
    pub at: Duration,
    pub query: String,
}

#[derive(Debug, Default, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct Response {
    /// # Latency of the call.
    #[serde(default, with = "humantime_serde")]
    #[schemars(with = "Option<String>")]
    pub delay: Option<Duration>,
    /// # Failure status of the call (429 to rate limit it).
    #[serde(default)]
    pub status: Option<u16>,
}

/// Backend which answers queries with catalog values they prefix,
/// applying the n-th scripted Response to its n-th call.
pub struct Scripted {
    catalog: Vec<String>,
    responses: Vec<Response>,
    calls: AtomicUsize,
}

impl Scripted {
    pub fn new(catalog: Vec<String>, responses: Vec<Response>) -> Self {
        Self {
            catalog,
            responses,
            calls: AtomicUsize::new(0),
        }
    }

    /// Number of calls made of this backend.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Backend for Scripted {
    fn fetch_results(
        &self,
        query: &str,
    ) -> impl std::future::Future<Output = Result<ResultList, BackendError>> + Send {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        let Response { delay, status } = self.responses.get(call).cloned().unwrap_or_default();

        let results: ResultList = self
            .catalog
            .iter()
            .filter(|value| value.starts_with(query))
            .cloned()
            .collect();

        tracing::debug!(call, query, ?delay, ?status, "backend called");

        async move {
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            match status {
                Some(429) => Err(BackendError::RateLimited),
                Some(status) => Err(BackendError::Status(status)),
                None => Ok(results),
            }
        }
    }
}

/// Play `script` through a Pipeline, passing each emitted ResultList to `emit`.
pub async fn run<F>(script: Script, mut emit: F) -> anyhow::Result<()>
where
    F: FnMut(&ResultList) -> anyhow::Result<()>,
{
    let Script {
        pipeline,
        catalog,
        inputs,
        complete_at,
        responses,
    } = script;

    let input = timed::stream(
        inputs.into_iter().map(|Input { at, query }| (at, query)).collect(),
        complete_at.unwrap_or_default(),
    );
    let pipeline = Pipeline::new(Scripted::new(catalog, responses), pipeline);
    let mut output = pipeline.spawn(input);

    let mut emitted = 0;
    while let Some(results) = output.next().await {
        emit(&results)?;
        emitted += 1;
    }

    tracing::info!(emitted, "autocomplete script completed");
    Ok(())
}

fn bright_stars() -> Vec<String> {
    BRIGHT_STARS.iter().map(|star| star.to_string()).collect()
}

const BRIGHT_STARS: &[&str] = &[
    "Acamar", "Achernar", "Acrux", "Adhara", "Aldebaran", "Alderamin", "Algieba", "Algol",
    "Alioth", "Alkaid", "Alnair", "Alnilam", "Alnitak", "Alphard", "Altair", "Antares",
    "Arcturus", "Atria", "Avior", "Bellatrix", "Betelgeuse", "Canopus", "Capella", "Caph",
    "Castor", "Deneb", "Denebola", "Diphda", "Dubhe", "Elnath", "Eltanin", "Enif", "Fomalhaut",
    "Gacrux", "Hadar", "Hamal", "Kochab", "Menkar", "Miaplacidus", "Mimosa", "Mintaka",
    "Mirach", "Mirfak", "Mizar", "Nunki", "Peacock", "Polaris", "Pollux", "Procyon",
    "Rasalhague", "Regulus", "Rigel", "Sabik", "Sadr", "Saiph", "Shaula", "Sirius", "Spica",
    "Suhail", "Vega", "Wezen",
];

#[cfg(test)]
mod test {
    use super::*;
    use pretty_assertions::assert_eq;
    use tokio::time::Instant;

    async fn play(script: Script) -> Vec<(u64, ResultList)> {
        let started = Instant::now();
        let mut out = Vec::new();

        run(script, |results| {
            out.push((started.elapsed().as_millis() as u64, results.clone()));
            Ok(())
        })
        .await
        .unwrap();

        out
    }

    #[tokio::test(start_paused = true)]
    async fn test_fixture_script() {
        let script: Script =
            serde_yaml::from_str(include_str!("../fixtures/autocomplete.yaml")).unwrap();
        assert_eq!(script.catalog.len(), BRIGHT_STARS.len());

        insta::assert_json_snapshot!(play(script).await, @r###"
        [
          [
            800,
            [
              "Bellatrix",
              "Betelgeuse"
            ]
          ],
          [
            2700,
            [
              "Betelgeuse"
            ]
          ],
          [
            3000,
            []
          ]
        ]
        "###);
    }

    #[tokio::test(start_paused = true)]
    async fn test_custom_catalog_and_preset() {
        let script = Script {
            pipeline: Config::switch_only(),
            catalog: vec!["alpha".to_string(), "alpine".to_string(), "beta".to_string()],
            inputs: vec![
                Input {
                    at: Duration::ZERO,
                    query: "al".to_string(),
                },
                Input {
                    at: Duration::from_millis(50),
                    query: "alp".to_string(),
                },
            ],
            complete_at: Some(Duration::from_secs(1)),
            responses: vec![
                Response {
                    delay: Some(Duration::from_millis(100)),
                    status: None,
                },
                Response {
                    delay: Some(Duration::from_millis(100)),
                    status: Some(503),
                },
            ],
        };

        // The first query is superseded before it's answered,
        // and the second fails and is answered with an empty list.
        assert_eq!(play(script).await, vec![(150, Vec::new())]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_scripted_backend() {
        let backend = Scripted::new(
            bright_stars(),
            vec![
                Response {
                    status: Some(429),
                    ..Default::default()
                },
                Response {
                    delay: Some(Duration::from_millis(10)),
                    status: None,
                },
            ],
        );

        assert!(backend
            .fetch_results("Al")
            .await
            .unwrap_err()
            .is_rate_limited());
        assert_eq!(
            backend.fetch_results("Alg").await.unwrap(),
            vec!["Algieba".to_string(), "Algol".to_string()]
        );
        assert_eq!(backend.fetch_results("Zz").await.unwrap(), ResultList::new());
        assert_eq!(backend.calls(), 3);
    }
}
