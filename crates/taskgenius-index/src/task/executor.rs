//! Parse executors
//!
//! Parsing is a pure function of content and context, so it can run on the
//! calling task or on a rayon pool. The executor is picked once, when the
//! task manager is built; results always come back to the caller, which
//! alone writes to the task cache.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use async_trait::async_trait;
use rayon::{ThreadPool, ThreadPoolBuilder};
use taskgenius_parsers::{parse_content, ParseContext, ParseOutput, ParserConfig};
use tokio::sync::oneshot;
use tracing::{info, warn};

use crate::config::WorkersConfig;
use crate::error::{IndexError, IndexResult};

/// Strategy for running the parse step
#[async_trait]
pub trait ParseExecutor: Send + Sync {
    async fn parse(&self, content: String, ctx: ParseContext) -> IndexResult<ParseOutput>;

    fn name(&self) -> &'static str;
}

/// Parses on the calling task
pub struct InProcessExecutor {
    config: Arc<ParserConfig>,
}

impl InProcessExecutor {
    pub fn new(config: Arc<ParserConfig>) -> Self {
        Self { config }
    }
}

#[async_trait]
impl ParseExecutor for InProcessExecutor {
    async fn parse(&self, content: String, ctx: ParseContext) -> IndexResult<ParseOutput> {
        Ok(parse_content(&content, &ctx, &self.config))
    }

    fn name(&self) -> &'static str {
        "in-process"
    }
}

/// Parses on a bounded rayon pool and awaits the result over a oneshot
pub struct WorkerPoolExecutor {
    pool: ThreadPool,
    config: Arc<ParserConfig>,
}

impl WorkerPoolExecutor {
    pub fn new(threads: usize, config: Arc<ParserConfig>) -> IndexResult<Self> {
        if threads == 0 {
            return Err(IndexError::Worker {
                message: "worker pool needs at least one thread".to_string(),
            });
        }
        let pool = ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(|i| format!("taskgenius-parser-{}", i))
            .build()
            .map_err(|e| IndexError::Worker {
                message: e.to_string(),
            })?;
        Ok(Self { pool, config })
    }

    pub fn threads(&self) -> usize {
        self.pool.current_num_threads()
    }
}

#[async_trait]
impl ParseExecutor for WorkerPoolExecutor {
    async fn parse(&self, content: String, ctx: ParseContext) -> IndexResult<ParseOutput> {
        let (tx, rx) = oneshot::channel();
        let config = self.config.clone();
        self.pool.spawn(move || {
            let result = catch_unwind(AssertUnwindSafe(|| parse_content(&content, &ctx, &config)));
            match result {
                Ok(output) => {
                    let _ = tx.send(output);
                }
                Err(_) => warn!(path = %ctx.file_path, "Parser panicked on worker"),
            }
        });
        rx.await.map_err(|_| IndexError::Worker {
            message: "worker dropped the parse result".to_string(),
        })
    }

    fn name(&self) -> &'static str {
        "worker-pool"
    }
}

/// Pick the executor for a configuration, falling back to in-process
/// parsing when the pool cannot be built
pub fn build_executor(workers: &WorkersConfig, parser: Arc<ParserConfig>) -> Arc<dyn ParseExecutor> {
    if !workers.use_workers {
        return Arc::new(InProcessExecutor::new(parser));
    }
    match WorkerPoolExecutor::new(workers.max_workers, parser.clone()) {
        Ok(pool) => {
            info!(threads = pool.threads(), "Parsing on worker pool");
            Arc::new(pool)
        }
        Err(e) => {
            warn!(error = %e, "Worker pool unavailable, parsing in process");
            Arc::new(InProcessExecutor::new(parser))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const NOTE: &str = "# Plan\n- [ ] write draft #writing\n- [x] outline\n";

    #[tokio::test]
    async fn test_executors_agree() {
        let config = Arc::new(ParserConfig::default());
        let local = InProcessExecutor::new(config.clone());
        let pool = WorkerPoolExecutor::new(2, config).unwrap();

        let ctx = ParseContext::new("plan.md");
        let a = local.parse(NOTE.to_string(), ctx.clone()).await.unwrap();
        let b = pool.parse(NOTE.to_string(), ctx).await.unwrap();
        assert_eq!(a, b);
        assert_eq!(a.tasks.len(), 2);
    }

    #[test]
    fn test_disabled_workers_use_in_process() {
        let executor = build_executor(&WorkersConfig::default(), Arc::new(ParserConfig::default()));
        assert_eq!(executor.name(), "in-process");
    }

    #[test]
    fn test_unbuildable_pool_falls_back() {
        let workers = WorkersConfig {
            use_workers: true,
            max_workers: 0,
        };
        let executor = build_executor(&workers, Arc::new(ParserConfig::default()));
        assert_eq!(executor.name(), "in-process");
    }

    #[test]
    fn test_enabled_workers_use_pool() {
        let workers = WorkersConfig {
            use_workers: true,
            max_workers: 1,
        };
        let executor = build_executor(&workers, Arc::new(ParserConfig::default()));
        assert_eq!(executor.name(), "worker-pool");
    }
}
