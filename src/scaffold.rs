//! `hades init`: starter configuration files.
//!
//! Writes an example inventory, job set, plan set, and templates under
//! `hades/example/`. Existing files are never overwritten; each file is
//! reported as created or skipped.

use std::path::Path;

use anyhow::Context;
use colored::Colorize;

struct StarterFile {
    path: &'static str,
    content: &'static str,
}

const STARTER_FILES: &[StarterFile] = &[
    StarterFile {
        path: "hades/example/hosts.hades.yaml",
        content: HOSTS_TEMPLATE,
    },
    StarterFile {
        path: "hades/example/jobs.hades.yaml",
        content: JOBS_TEMPLATE,
    },
    StarterFile {
        path: "hades/example/plans.hades.yaml",
        content: PLANS_TEMPLATE,
    },
    StarterFile {
        path: "hades/example/tpl/sample",
        content: SAMPLE_SERVER_TEMPLATE,
    },
    StarterFile {
        path: "hades/example/tpl/apt-caddy.list",
        content: APT_CADDY_TEMPLATE,
    },
    StarterFile {
        path: "hades/example/tpl/Caddyfile",
        content: CADDYFILE_TEMPLATE,
    },
];

/// Write the starter files, skipping any that already exist.
pub fn run() -> anyhow::Result<()> {
    let width = STARTER_FILES
        .iter()
        .map(|file| file.path.len())
        .max()
        .unwrap_or(0);

    for file in STARTER_FILES {
        let padding = " ".repeat(width - file.path.len());

        if Path::new(file.path).exists() {
            println!("  {}{padding}   ..{}", file.path, "skipped".yellow());
            continue;
        }

        if let Some(dir) = Path::new(file.path).parent() {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("creating {}", dir.display()))?;
        }
        std::fs::write(file.path, file.content)
            .with_context(|| format!("writing {}", file.path))?;

        println!("  {}{padding}   ..{}", file.path, "created".green());
    }

    Ok(())
}

const HOSTS_TEMPLATE: &str = r#"hosts:
  worker-1:
    addr: 127.0.0.1
    port: 22
    user: root
    identity_file: ~/.ssh/id_ed25519

  worker-2:
    addr: 127.0.0.1
    port: 22
    user: root
    identity_file: ~/.ssh/id_ed25519

targets:
  workers: [worker-1, worker-2]
"#;

const JOBS_TEMPLATE: &str = r#"jobs:
  config:
    actions:
      - name: Setup dirs
        run: |
          set -e
          mkdir -p /root/tpl
          mkdir -p /app/releases
          mkdir -p /app/config

  install-caddy:
    guard:
      if: "! which caddy"
    actions:
      - name: Install deps
        run: |
          apt install -y \
            vim \
            wget \
            curl \
            unzip \
            debian-keyring debian-archive-keyring \
            apt-transport-https

      - name: GPG
        gpg:
          src: https://dl.cloudsmith.io/public/caddy/stable/gpg.key
          path: /usr/share/keyrings/caddy-stable-archive-keyring.gpg
          dearmor: true

      - name: Configure apt
        copy:
          src: hades/example/tpl/apt-caddy.list
          dst: /etc/apt/sources.list.d/caddy.list
          mode: "0644"

      - name: Install
        run: |
          set -e
          apt update
          apt install -y caddy

      - name: Start and enable service
        run: systemctl enable --now caddy

  update-caddy:
    env:
      DOMAIN:
    actions:
      - name: Update Caddyfile
        template:
          src: hades/example/tpl/Caddyfile
          dst: /etc/caddy/Caddyfile

      - name: Reload config
        run: systemctl reload caddy

  build:
    local: true
    env:
      TAG:
    artifacts:
      bin:
        path: build/app
    actions:
      - name: Build
        run: |
          set -e
          mkdir -p build/
          cp hades/example/tpl/sample build/app

  deploy:
    env:
      CONFIG:
      TAG:
    actions:
      - name: Prepare dirs
        run: "mkdir -p /app/config/${CONFIG}"

      - name: Prepare release
        run: |
          mkdir -p /app/releases/${TAG}
          ln -sfn /app/config/${CONFIG}/.env /app/releases/${TAG}/.env

      - name: Copy artifact
        copy:
          artifact: bin
          dst: /app/releases/${TAG}/app
          mode: "0755"

      - name: Release
        run: |
          ln -sfn /app/releases/${TAG} /app/current
"#;

const PLANS_TEMPLATE: &str = r#"plans:
  bootstrap:
    steps:
      - job: config
        targets: [workers]

      - job: install-caddy
        targets: [workers]

  deploy:
    env:
      TAG: v0.0.1
    steps:
      - job: build
        targets: [workers]

      - job: update-caddy
        targets: [workers]
        env:
          DOMAIN: beta.example.tld

      - job: deploy
        targets: [workers]
        env:
          CONFIG: v1
"#;

const SAMPLE_SERVER_TEMPLATE: &str = r#"
# sample http server

while true; do
  { printf 'HTTP/1.1 200 OK\r\nContent-Type: text/plain\r\n\r\nHades\n'; } | nc -l 8080 -q 1
done
"#;

const APT_CADDY_TEMPLATE: &str = r#"
# Source: Caddy
# Site: https://github.com/caddyserver/caddy
# Repository: Caddy / stable
# Description: Fast, multi-platform web server with automatic HTTPS

deb [signed-by=/usr/share/keyrings/caddy-stable-archive-keyring.gpg] https://dl.cloudsmith.io/public/caddy/stable/deb/debian any-version main

deb-src [signed-by=/usr/share/keyrings/caddy-stable-archive-keyring.gpg] https://dl.cloudsmith.io/public/caddy/stable/deb/debian any-version main
"#;

const CADDYFILE_TEMPLATE: &str = r#"
# This file was generated during hades run: ${HADES_RUN_ID}
# Do not edit manually.

${DOMAIN} {
	reverse_proxy localhost:8080
}
"#;
