use crate::domain::model::{PortBinding, Protocol, ServiceDescriptor, ServiceHandle};
use crate::utils::error::Result;
use async_trait::async_trait;

/// Answers whether something on the host already holds a port.
pub trait HostPortProbe: Send + Sync {
    fn is_bound(&self, port: u16, protocol: Protocol) -> Result<bool>;
}

#[async_trait]
pub trait ContainerLifecycle: Send + Sync {
    async fn start(&self, service: &ServiceDescriptor, binding: &PortBinding)
        -> Result<ServiceHandle>;
    async fn stop(&self, handle: &ServiceHandle) -> Result<()>;
    async fn is_healthy(&self, handle: &ServiceHandle) -> Result<bool>;

    /// 找出已存在的實例（給 teardown 用）
    async fn attach(&self, service: &ServiceDescriptor) -> Result<Option<ServiceHandle>>;
}

/// Where generated files live between runs.
pub trait ConfigStore: Send + Sync {
    fn read_file(&self, path: &str) -> impl std::future::Future<Output = Result<Vec<u8>>> + Send;
    fn write_file(
        &self,
        path: &str,
        data: &[u8],
    ) -> impl std::future::Future<Output = Result<()>> + Send;
}
