//! Entity retrieval by uid.
//!
//! Fetches a catalog entity with its chunks. Used by the `hub get` command.

use anyhow::{Context, Result};
use serde::Serialize;
use sqlx::SqlitePool;

use crate::config::Config;
use crate::db;
use crate::models::{Chunk, Entity};
use crate::repo;

/// An entity with everything derived from it.
#[derive(Debug, Clone, Serialize)]
pub struct EntityDetail {
    pub entity: Entity,
    pub chunks: Vec<Chunk>,
    pub vectors: i64,
}

/// Look up an entity by uid, case-insensitively.
pub async fn get_entity_detail(pool: &SqlitePool, uid: &str) -> Result<Option<EntityDetail>> {
    let mut conn = pool.acquire().await?;
    let Some(entity) = repo::find_by_uid_ci(&mut conn, uid).await? else {
        return Ok(None);
    };
    let chunks = repo::list_chunks(&mut conn, &entity.uid).await?;
    let vectors = repo::count_vectors(&mut conn, &entity.uid).await?;
    Ok(Some(EntityDetail {
        entity,
        chunks,
        vectors,
    }))
}

fn list(values: &[String]) -> String {
    if values.is_empty() {
        "-".to_string()
    } else {
        values.join(", ")
    }
}

/// CLI entry point: prints the entity and its chunks to stdout.
pub async fn run_get(config: &Config, uid: &str) -> Result<()> {
    let pool = db::connect(config).await?;
    let detail = get_entity_detail(&pool, uid).await?;
    pool.close().await;
    let detail = detail.with_context(|| format!("entity not found: {}", uid))?;
    let e = &detail.entity;

    let status = if e.is_ready() {
        "ready".to_string()
    } else if let Some(err) = &e.registration_error {
        format!("failed ({})", err)
    } else {
        "pending".to_string()
    };

    println!("--- Entity ---");
    println!("uid:          {}", e.uid);
    println!("type:         {}", e.kind);
    println!("name:         {}", e.name);
    println!("version:      {}", e.version);
    if let Some(summary) = &e.summary {
        println!("summary:      {}", summary);
    }
    if let Some(url) = &e.source_url {
        println!("source_url:   {}", url);
    }
    if let Some(license) = &e.license {
        println!("license:      {}", license);
    }
    println!("capabilities: {}", list(&e.capabilities));
    println!("frameworks:   {}", list(&e.frameworks));
    println!("providers:    {}", list(&e.providers));
    println!("protocols:    {}", list(&e.protocols));
    println!("quality:      {:.2}", e.quality_score);
    println!("released:     {}", e.effective_ts().format("%Y-%m-%d"));
    println!("status:       {}", status);
    println!();

    if let Some(description) = &e.description {
        println!("--- Description ---");
        println!("{}", description);
        println!();
    }

    println!(
        "--- Chunks ({}, {} embedded) ---",
        detail.chunks.len(),
        detail.vectors
    );
    for chunk in &detail.chunks {
        println!("[chunk {}] ~{} tokens", chunk.order, chunk.tokens_est);
        println!("{}", chunk.text);
        println!();
    }

    Ok(())
}
