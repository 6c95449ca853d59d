//! Vault dev container fixture for the end-to-end tests.

use testcontainers::{
    core::{IntoContainerPort, WaitFor},
    runners::AsyncRunner,
    ContainerAsync, GenericImage, ImageExt,
};
use vault_steward::{StringSource, Vault};

pub const ROOT_TOKEN: &str = "root";
const RUN_ENV: &str = "VAULT_STEWARD_RUN_INTEGRATION_TESTS";

/// Set up logging for tests
pub fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("info")
        .with_test_writer() // This ensures output goes to both stdout and test output
        .try_init();
}

/// A running dev server and a client authenticated with its root token.
pub struct DevVault {
    pub vault: Vault,
    pub address: String,
    _container: ContainerAsync<GenericImage>,
}

/// Starts a Vault dev server, or returns `None` when integration tests are disabled.
pub async fn dev_vault() -> Option<DevVault> {
    if std::env::var(RUN_ENV).as_deref() != Ok("true") {
        eprintln!("skipping: set {}=true to run against a vault container", RUN_ENV);
        return None;
    }
    init_logging();

    let container = GenericImage::new("hashicorp/vault", "1.18.4")
        .with_exposed_port(8200.tcp())
        .with_wait_for(WaitFor::message_on_stdout("Vault server started!"))
        .with_env_var("VAULT_DEV_ROOT_TOKEN_ID", ROOT_TOKEN)
        .with_env_var("VAULT_DEV_LISTEN_ADDRESS", "0.0.0.0:8200")
        .with_cmd(vec!["server", "-dev", "-dev-root-token-id=root"])
        .start()
        .await
        .expect("failed to start vault container");
    let host = container.get_host().await.expect("container host");
    let port = container.get_host_port_ipv4(8200).await.expect("container port");
    let address = format!("http://{}:{}", host, port);

    let vault = Vault::builder()
        .address_from(StringSource::value(address.clone()))
        .token_from(StringSource::value(ROOT_TOKEN))
        .complete()
        .await
        .expect("failed to connect to vault container");

    Some(DevVault {
        vault,
        address,
        _container: container,
    })
}
