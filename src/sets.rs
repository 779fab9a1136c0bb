//! Descriptor set management: `init` and `sets`.
//!
//! Both work from the model table alone and never load model weights.

use anyhow::Result;

use guide_index_core::store::{check_compatible, DescriptorStore};

use crate::config::Config;
use crate::pipelines;
use crate::store::open_store;

/// Create the descriptor set of each selected pipeline.
pub async fn init_sets(
    config: &Config,
    store: &dyn DescriptorStore,
    which: Option<&str>,
) -> Result<Vec<String>> {
    let mut created = Vec::new();
    for (name, pipeline_config) in pipelines::select(config, which)? {
        let pipeline = pipelines::schema(name, pipeline_config)?;
        pipeline.ensure_set(store).await?;
        println!(
            "  {} -> {} ({} dims, {}/{})",
            name,
            pipeline.set.name,
            pipeline.set.dimensions,
            guide_index_core::models::ENGINE_FLAT,
            guide_index_core::models::METRIC_IP
        );
        created.push(pipeline.set.name.clone());
    }
    Ok(created)
}

pub async fn run_init(config: &Config, which: Option<&str>) -> Result<()> {
    let store = open_store(config).await?;
    println!("init ({})", store.backend_name());
    init_sets(config, store.as_ref(), Some(which.unwrap_or("all"))).await?;
    println!("ok");
    Ok(())
}

/// Print each configured pipeline and the state of its set.
pub async fn run_sets(config: &Config) -> Result<()> {
    let store = open_store(config).await?;

    println!(
        "{:<12} {:<30} {:<8} {:<22} {:>5} {:>3}  STATUS",
        "PIPELINE", "SET", "ENCODER", "MODEL", "DIMS", "K"
    );
    for (name, p) in &config.pipelines {
        let pipeline = pipelines::schema(name, p)?;
        let status = match store.describe_set(&p.set).await? {
            None => "missing".to_string(),
            Some(info) => match check_compatible(&info, &pipeline.set) {
                Ok(()) => match info.count {
                    Some(n) => format!("ok ({} descriptors)", n),
                    None => "ok".to_string(),
                },
                Err(e) => format!("CONFLICT: {}", e),
            },
        };
        println!(
            "{:<12} {:<30} {:<8} {:<22} {:>5} {:>3}  {}",
            name,
            p.set,
            p.encoder.as_str(),
            p.model(),
            pipeline.set.dimensions,
            pipeline.k,
            status
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::parse_config;
    use guide_index_core::store::memory::InMemoryStore;

    #[tokio::test]
    async fn init_all_creates_every_set_once() {
        let config = parse_config(
            "[store]\nbackend = \"sqlite\"\n[store.sqlite]\npath = \"unused.sqlite\"\n",
        )
        .unwrap();
        let store = InMemoryStore::new();

        let created = init_sets(&config, &store, Some("all")).await.unwrap();
        assert_eq!(created, vec!["pdf_instructions_image_text", "pdf_instructions"]);
        init_sets(&config, &store, Some("all")).await.unwrap();

        let text = store.describe_set("pdf_instructions").await.unwrap().unwrap();
        assert_eq!(text.dimensions, 384);
        let mm = store
            .describe_set("pdf_instructions_image_text")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(mm.dimensions, 512);
    }
}
