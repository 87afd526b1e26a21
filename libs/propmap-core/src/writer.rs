//! Message writer
//!
//! Transforms device messages and hands them to a downstream sink such as a
//! time-series writer. Sink failures are logged and dropped so one bad write
//! never stalls ingestion.

use crate::resolver::MappingLoader;
use crate::transformer::DataTransformer;
use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use propmap_model::DeviceMessage;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Destination of transformed messages
#[async_trait]
pub trait DeviceDataSink: Send + Sync {
    async fn save_message(&self, message: DeviceMessage) -> anyhow::Result<()>;
}

pub struct MessageWriter<L: MappingLoader, S: DeviceDataSink> {
    transformer: Arc<DataTransformer<L>>,
    sink: Arc<S>,
}

impl<L: MappingLoader, S: DeviceDataSink> Clone for MessageWriter<L, S> {
    fn clone(&self) -> Self {
        Self {
            transformer: Arc::clone(&self.transformer),
            sink: Arc::clone(&self.sink),
        }
    }
}

impl<L: MappingLoader, S: DeviceDataSink> MessageWriter<L, S> {
    pub fn new(transformer: Arc<DataTransformer<L>>, sink: Arc<S>) -> Self {
        Self { transformer, sink }
    }

    /// Transform then save one message; returns whether the sink accepted it
    pub async fn write(&self, message: DeviceMessage) -> bool {
        let device_id = message.device_id.clone();
        let message = self.transformer.transform_message(message).await;
        match self.sink.save_message(message).await {
            Ok(()) => true,
            Err(e) => {
                warn!("Failed to save message of device {}: {:#}", device_id, e);
                false
            }
        }
    }

    /// Drain `rx` until every sender is dropped
    ///
    /// Up to `concurrency` messages are in flight at once; messages of
    /// different devices are not ordered relative to each other.
    pub async fn run(&self, rx: mpsc::Receiver<DeviceMessage>, concurrency: usize) -> usize {
        let messages = stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|message| (message, rx))
        });

        let written = Arc::new(AtomicUsize::new(0));
        messages
            .for_each_concurrent(concurrency.max(1), |message| {
                let written = Arc::clone(&written);
                async move {
                    if self.write(message).await {
                        written.fetch_add(1, Ordering::Relaxed);
                    }
                }
            })
            .await;

        let written = written.load(Ordering::Relaxed);
        debug!("Message writer stopped after {} writes", written);
        written
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MappingCache;
    use crate::config::CacheConfig;
    use crate::error::Result;
    use propmap_calc::TransformEngine;
    use propmap_model::{
        MappingRule, MessageType, PropertyMap, PropertyMetadata, ResolvedMappingDetail,
        Transformation,
    };
    use serde_json::json;
    use std::sync::Mutex;

    struct FixedLoader;

    #[async_trait]
    impl MappingLoader for FixedLoader {
        async fn load(&self, device_id: &str) -> Result<Vec<ResolvedMappingDetail>> {
            let rule = MappingRule::for_device("p", device_id, "temperature", "temp_f");
            Ok(vec![ResolvedMappingDetail::of_device("p", device_id)
                .with_property(&PropertyMetadata::new("temperature"))
                .with_rule(Some(&rule), Some(Transformation::math("(x - 32) * 5/9")))])
        }
    }

    #[derive(Default)]
    struct RecordingSink {
        saved: Mutex<Vec<DeviceMessage>>,
        reject_device: Option<String>,
    }

    #[async_trait]
    impl DeviceDataSink for RecordingSink {
        async fn save_message(&self, message: DeviceMessage) -> anyhow::Result<()> {
            if self.reject_device.as_deref() == Some(message.device_id.as_str()) {
                anyhow::bail!("disk full");
            }
            self.saved.lock().unwrap().push(message);
            Ok(())
        }
    }

    fn writer(sink: RecordingSink) -> (MessageWriter<FixedLoader, RecordingSink>, Arc<RecordingSink>) {
        let cache = MappingCache::new(FixedLoader, CacheConfig::default());
        let transformer = Arc::new(DataTransformer::new(cache, Arc::new(TransformEngine::new())));
        let sink = Arc::new(sink);
        (MessageWriter::new(transformer, sink.clone()), sink)
    }

    fn report(device_id: &str) -> DeviceMessage {
        let properties: PropertyMap = serde_json::from_value(json!({ "temp_f": 212 })).unwrap();
        DeviceMessage::report_property(device_id, properties)
    }

    #[tokio::test]
    async fn test_write_transforms_before_saving() {
        let (writer, sink) = writer(RecordingSink::default());
        assert!(writer.write(report("d1")).await);

        let saved = sink.saved.lock().unwrap();
        let temperature = saved[0].properties["temperature"].as_f64().unwrap();
        assert!((temperature - 100.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_other_message_types_pass_through() {
        let (writer, sink) = writer(RecordingSink::default());
        let mut message = report("d1");
        message.message_type = MessageType::Event;
        writer.write(message).await;

        let saved = sink.saved.lock().unwrap();
        assert!(!saved[0].properties.contains_key("temperature"));
    }

    #[tokio::test]
    async fn test_sink_failure_is_swallowed() {
        let (writer, sink) = writer(RecordingSink {
            reject_device: Some("bad".to_string()),
            ..Default::default()
        });
        assert!(!writer.write(report("bad")).await);
        assert!(writer.write(report("good")).await);
        assert_eq!(sink.saved.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_run_drains_channel() {
        let (writer, sink) = writer(RecordingSink {
            reject_device: Some("d3".to_string()),
            ..Default::default()
        });
        let (tx, rx) = mpsc::channel(8);
        for device in ["d1", "d2", "d3", "d4"] {
            tx.send(report(device)).await.unwrap();
        }
        drop(tx);

        assert_eq!(writer.run(rx, 2).await, 3);
        assert_eq!(sink.saved.lock().unwrap().len(), 3);
    }
}
