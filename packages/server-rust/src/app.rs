//! Process wiring: in-memory services exposed as RPC routes, and client stubs
//! for calling them remotely.

use std::sync::Arc;

use crate::service::config::{ConfigError, ServiceConfig};
use crate::service::domain::{
    BasicOrderService, BasicProductService, BasicUserService, OrderEndpoints, ProductEndpoints,
    UserEndpoints,
};
use crate::storage::MemoryStore;
use crate::transport::{Channel, RpcRouter};

/// Server-role endpoint sets over in-memory storage.
///
/// Storage is created here and owned by the services; nothing outlives the
/// `Services` value.
#[derive(Clone)]
pub struct Services {
    pub product: ProductEndpoints,
    pub user: UserEndpoints,
    pub order: OrderEndpoints,
    config: ServiceConfig,
}

impl Services {
    /// # Errors
    ///
    /// Returns [`ConfigError`] if `config` does not validate.
    pub fn in_memory(config: &ServiceConfig) -> Result<Self, ConfigError> {
        config.validate()?;

        let users = BasicUserService::new(Arc::new(MemoryStore::new()), Arc::new(MemoryStore::new()));
        let orders = BasicOrderService::new(Arc::new(MemoryStore::new()));

        Ok(Self {
            product: ProductEndpoints::serve(Arc::new(BasicProductService), config)?,
            user: UserEndpoints::serve(Arc::new(users), config)?,
            order: OrderEndpoints::serve(Arc::new(orders), config)?,
            config: config.clone(),
        })
    }

    /// Every capability mounted at its RPC path.
    #[must_use]
    pub fn rpc_router(&self) -> RpcRouter {
        let router = RpcRouter::new(self.config.call_timeout());
        let router = self.product.mount(router);
        let router = self.user.mount(router);
        self.order.mount(router)
    }
}

/// Client-role endpoint sets calling a remote server over one channel.
#[derive(Clone)]
pub struct Clients {
    pub product: ProductEndpoints,
    pub user: UserEndpoints,
    pub order: OrderEndpoints,
}

impl Clients {
    /// # Errors
    ///
    /// Returns [`ConfigError`] if `config` does not validate.
    pub fn connect(channel: Arc<dyn Channel>, config: &ServiceConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            product: ProductEndpoints::remote(&channel, config)?,
            user: UserEndpoints::remote(&channel, config)?,
            order: OrderEndpoints::remote(&channel, config)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::call::CallContext;
    use crate::service::config::RateLimitConfig;
    use crate::service::domain::user::RegisterRequest;
    use crate::service::domain::{OrderService, ProductService, UserService};
    use crate::transport::RouterChannel;

    fn connected(config: &ServiceConfig) -> Clients {
        let services = Services::in_memory(config).unwrap();
        let channel: Arc<dyn Channel> = Arc::new(RouterChannel::new(services.rpc_router().into_router()));
        Clients::connect(channel, config).unwrap()
    }

    #[tokio::test]
    async fn every_capability_is_reachable() {
        let clients = connected(&ServiceConfig::default());

        assert_eq!(clients.product.sum(CallContext::new(), 2, 3).await.unwrap(), 5);

        let id = clients
            .user
            .register(
                CallContext::new(),
                RegisterRequest {
                    first_name: "Ada".into(),
                    last_name: "Lovelace".into(),
                    email: "ada@example.com".into(),
                    username: "ada".into(),
                    password: "engine".into(),
                },
            )
            .await
            .unwrap();
        let profile = clients.user.get_user(CallContext::new(), id.clone()).await.unwrap();
        assert_eq!(profile.username, "ada");

        clients.order.create_order(CallContext::new(), id.clone(), 9.5).await.unwrap();
        let orders = clients.order.get_orders(CallContext::new(), id).await.unwrap();
        assert_eq!(orders.len(), 1);
    }

    #[test]
    fn invalid_config_is_rejected_up_front() {
        let mut config = ServiceConfig::default();
        config.server.defaults.rate_limit = Some(RateLimitConfig {
            capacity: 0,
            refill_per_second: 1.0,
            max_wait_ms: 0,
        });
        assert!(Services::in_memory(&config).is_err());
    }
}
