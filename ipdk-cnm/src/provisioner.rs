//! Dataplane provisioning through the IPDK command-line tools.
//!
//! Uses `gnmi-cli` and `ovs-p4ctl` inside the dataplane container for the
//! vhost-user device and forwarding rule, and `ip link` on the host for the
//! placeholder interface.
//!
//! Provisioning is not transactional: a failing step leaves the effects of
//! the earlier steps in place. Deprovisioning only removes the placeholder
//! interface and the socket directory; the vhost-user device and forwarding
//! rule stay in the dataplane.

use std::fs::DirBuilder;
use std::io;
use std::net::IpAddr;
use std::os::unix::fs::DirBuilderExt;
use std::path::PathBuf;
use std::process::{Command, Output};
use thiserror::Error;
use tracing::{info, warn};

/// Socket file created by the dataplane inside each port directory.
const SOCKET_FILE: &str = "vhu.sock";

/// `ip link` stderr when the named interface does not exist.
const MISSING_LINK: &str = "Cannot find device";

#[derive(Debug, Error)]
pub enum ProvisionError {
    #[error("Error making socket path {path}: {source}")]
    SocketDir {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Couldn't delete {path}: {source}")]
    RemoveSocketDir {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to run {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },

    #[error("Command [{program} {args}] failed ({status}): {stderr}")]
    CommandFailed {
        program: String,
        args: String,
        status: String,
        stderr: String,
    },
}

pub type Result<T> = std::result::Result<T, ProvisionError>;

/// Result of a successful provisioning run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProvisionedPort {
    /// Name of the placeholder interface. Equals the endpoint's bare address.
    pub port_name: String,
    /// vhost-user socket the dataplane listens on.
    pub socket_path: PathBuf,
}

/// Materializes and removes dataplane resources for an endpoint.
pub trait Provisioner: Send + Sync {
    fn provision_endpoint(&self, address: IpAddr, interface_index: u64)
    -> Result<ProvisionedPort>;

    fn deprovision_endpoint(&self, port_name: &str) -> Result<()>;
}

/// Executes an external program and waits for it to exit.
pub trait CommandRunner: Send + Sync {
    fn run(&self, program: &str, args: &[String]) -> io::Result<Output>;
}

/// Runs commands as child processes of this daemon.
pub struct SystemRunner;

impl CommandRunner for SystemRunner {
    fn run(&self, program: &str, args: &[String]) -> io::Result<Output> {
        Command::new(program).args(args).output()
    }
}

#[derive(Debug, Clone)]
pub struct ProvisionerConfig {
    /// Parent of the per-endpoint `vhostuser_<ip>` directories.
    pub socket_dir: PathBuf,
    /// Binary used to exec into the dataplane container.
    pub container_runtime: String,
    /// Container running the IPDK dataplane tools.
    pub container: String,
    /// P4 bridge the forwarding rules are installed on.
    pub bridge: String,
    pub forwarding_table: String,
    pub forwarding_action: String,
    /// Directory of the simple L3 P4 program inside the container.
    pub pipeline_dir: String,
}

impl Default for ProvisionerConfig {
    fn default() -> Self {
        Self {
            socket_dir: PathBuf::from("/tmp"),
            container_runtime: "docker".to_string(),
            container: "ipdk".to_string(),
            bridge: "br0".to_string(),
            forwarding_table: "ingress.ipv4_host".to_string(),
            forwarding_action: "ingress.send".to_string(),
            pipeline_dir: "/root/examples/simple_l3".to_string(),
        }
    }
}

/// Provisioner that shells out to the IPDK tools.
pub struct CliProvisioner<R = SystemRunner> {
    config: ProvisionerConfig,
    runner: R,
}

impl CliProvisioner<SystemRunner> {
    pub fn new(config: ProvisionerConfig) -> Self {
        Self::with_runner(config, SystemRunner)
    }
}

impl<R: CommandRunner> CliProvisioner<R> {
    pub fn with_runner(config: ProvisionerConfig, runner: R) -> Self {
        Self { config, runner }
    }

    pub fn runner(&self) -> &R {
        &self.runner
    }

    /// Socket directory for a port, e.g. `/tmp/vhostuser_10.0.0.5`.
    pub fn socket_dir(&self, port_name: &str) -> PathBuf {
        self.config
            .socket_dir
            .join(format!("vhostuser_{}", port_name))
    }

    /// Run a command and return the first line of its stdout.
    fn exec(&self, program: &str, args: Vec<String>) -> Result<String> {
        info!(program, ?args, "Running command");

        let output = self
            .runner
            .run(program, &args)
            .map_err(|source| ProvisionError::Spawn {
                program: program.to_string(),
                source,
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            warn!(program, ?args, status = %output.status, %stderr, "Command failed");
            return Err(ProvisionError::CommandFailed {
                program: program.to_string(),
                args: args.join(" "),
                status: output.status.to_string(),
                stderr,
            });
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let first = stdout.lines().next().unwrap_or_default().to_string();
        info!(program, result = %first, "Command succeeded");
        Ok(first)
    }

    /// `docker exec <container> <tool> <args...>`
    fn exec_in_container(&self, tool: &str, tool_args: &[String]) -> Result<String> {
        let mut args = vec![
            "exec".to_string(),
            self.config.container.clone(),
            tool.to_string(),
        ];
        args.extend_from_slice(tool_args);
        let runtime = self.config.container_runtime.clone();
        self.exec(&runtime, args)
    }

    /// Compile the simple L3 program and load it onto the bridge.
    pub fn program_pipeline(&self) -> Result<()> {
        let dir = &self.config.pipeline_dir;

        self.exec_in_container(
            "p4c",
            &[
                "--arch".to_string(),
                "psa".to_string(),
                "--target".to_string(),
                "dpdk".to_string(),
                "--output".to_string(),
                format!("{dir}/pipe"),
                "--p4runtime-files".to_string(),
                format!("{dir}/p4Info.txt"),
                "--bf-rt-schema".to_string(),
                format!("{dir}/bf-rt.json"),
                "--context".to_string(),
                format!("{dir}/pipe/context.json"),
                format!("{dir}/simple_l3.p4"),
            ],
        )?;

        self.exec_in_container(
            "bash",
            &[
                "-c".to_string(),
                format!(
                    "cd {dir} && ovs_pipeline_builder --p4c_conf_file={dir}/simple_l3.conf \
                     --bf_pipeline_config_binary_file=simple_l3.pb.bin"
                ),
            ],
        )?;

        self.exec_in_container(
            "bash",
            &[
                "-c".to_string(),
                format!(
                    "cd {dir} && ovs-p4ctl set-pipe {} {dir}/simple_l3.pb.bin {dir}/p4Info.txt",
                    self.config.bridge
                ),
            ],
        )?;

        info!(bridge = %self.config.bridge, "P4 pipeline programmed");
        Ok(())
    }
}

impl<R: CommandRunner> Provisioner for CliProvisioner<R> {
    fn provision_endpoint(
        &self,
        address: IpAddr,
        interface_index: u64,
    ) -> Result<ProvisionedPort> {
        let port_name = address.to_string();

        // 1. Socket directory. Fails if the address is already provisioned.
        let dir = self.socket_dir(&port_name);
        info!(path = %dir.display(), "Creating socket directory");
        DirBuilder::new()
            .mode(0o755)
            .create(&dir)
            .map_err(|source| ProvisionError::SocketDir {
                path: dir.clone(),
                source,
            })?;
        let socket_path = dir.join(SOCKET_FILE);

        // 2. vhost-user device bound to the socket.
        let device = format!(
            "device:virtual-device,name:net_vhost{idx},host:host_{idx},device-type:VIRTIO_NET,\
             queues:1,socket-path:{},port-type:LINK",
            socket_path.display(),
            idx = interface_index,
        );
        self.exec_in_container("gnmi-cli", &["set".to_string(), device])?;

        // 3. Forwarding rule: destination address -> interface index.
        let entry = format!(
            "hdr.ipv4.dst_addr={},action={}({})",
            address, self.config.forwarding_action, interface_index
        );
        self.exec_in_container(
            "ovs-p4ctl",
            &[
                "add-entry".to_string(),
                self.config.bridge.clone(),
                self.config.forwarding_table.clone(),
                entry,
            ],
        )?;

        // 4. Placeholder interface so the container runtime can find the port.
        self.exec(
            "ip",
            vec![
                "link".to_string(),
                "add".to_string(),
                port_name.clone(),
                "type".to_string(),
                "dummy".to_string(),
            ],
        )?;

        info!(%port_name, interface_index, "Endpoint provisioned");
        Ok(ProvisionedPort {
            port_name,
            socket_path,
        })
    }

    fn deprovision_endpoint(&self, port_name: &str) -> Result<()> {
        // Dummy links do not survive a host reboot, the ledger does.
        info!(port_name, "Deleting placeholder interface");
        match self.exec(
            "ip",
            vec!["link".to_string(), "del".to_string(), port_name.to_string()],
        ) {
            Ok(_) => {}
            Err(ProvisionError::CommandFailed { stderr, .. }) if stderr.contains(MISSING_LINK) => {
                warn!(port_name, "Placeholder interface already gone");
            }
            Err(e) => return Err(e),
        }

        let dir = self.socket_dir(port_name);
        info!(path = %dir.display(), "Removing socket directory");
        match std::fs::remove_dir_all(&dir) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                warn!(path = %dir.display(), "Socket directory already gone");
            }
            Err(source) => {
                return Err(ProvisionError::RemoveSocketDir { path: dir, source });
            }
        }
        Ok(())
    }
}
