// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::time::Duration;

use anyhow::{Context, Result};
use iscsi_initiator_rs::{
    cfg::{cli::resolve_config_path, config::Config, logger::init_logger},
    hba::tcp::TcpHba,
    models::nop::request::NopOutRequest,
    session::{
        lifecycle::{leading_login, logout_session},
        types::Target,
    },
    state_machine::nop_states::NopCtx,
};
use tokio::time::{sleep, timeout};
use tokio_util::sync::CancellationToken;
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    let _init_logger = init_logger("tests/config_logger.yaml")?;

    // Load config
    let cfg = resolve_config_path("docker/lio/config.lio.yaml")
        .and_then(Config::load_from_file)
        .context("failed to resolve or load config")?;

    let target = Target { name: cfg.login.identity.target_name.clone(), alias: None };
    let portal = cfg
        .login
        .transport
        .target_address
        .parse()
        .context("failed to parse configured target address as a portal")?;

    // The HBA owns every TCP connection behind a single opaque handle; the
    // config supplies the initiator identity/auth/negotiation defaults that
    // get cloned and pointed at each target/portal pair.
    let hba = TcpHba::new(cfg, CancellationToken::new());

    // ---- Leading login ----
    let login = leading_login(hba.as_ref(), &target, &portal)
        .await
        .context("leading login failed")?;
    info!(
        session = login.session.0,
        tsih = login.session_params.tsih,
        "logged in"
    );

    let lun = 1u64 << 48;

    // Send 3 keep-alive NOPs (sequentially for simplicity)
    for _ in 0..3 {
        timeout(
            Duration::from_secs(10),
            hba.execute_with(login.session, login.connection, |conn, itt, cmd_sn, exp_stat_sn| {
                NopCtx::new(
                    conn,
                    lun,
                    itt,
                    cmd_sn,
                    exp_stat_sn,
                    NopOutRequest::DEFAULT_TAG,
                )
            }),
        )
        .await
        .context("nop timeout")??;
    }

    // Let unsolicited NOP-In (if any) come in
    sleep(Duration::from_secs(5)).await;

    // Logout the session
    logout_session(hba.as_ref(), login.session)
        .await
        .context("logout failed")?;

    Ok(())
}
