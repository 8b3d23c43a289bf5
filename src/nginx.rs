//! The nginx site that fronts the API.

use std::fmt::Write as _;

use crate::error::ProvisionResult;
use crate::host::Host;
use crate::settings::Settings;

/// Which variant of the site is active on the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SiteMode {
    /// Plain HTTP proxy plus the ACME webroot, used until a
    /// certificate exists.
    Bootstrap,
    /// HTTP redirect block plus the HTTPS proxy block.
    Tls,
}

/// Nginx upstream identifier for the app (`epaper-api` becomes
/// `epaper_api`).
#[must_use]
pub fn upstream_name(settings: &Settings) -> String {
    settings.app_name.replace('-', "_")
}

/// Render the full site: an HTTP server that redirects to HTTPS,
/// and an HTTPS server proxying to the API on `127.0.0.1:<port>`.
#[must_use]
pub fn render(settings: &Settings) -> String {
    let domain = &settings.domain;
    let cert_dir = settings.certificate_dir();
    let cert_dir = cert_dir.display();

    let mut out = upstream_block(settings);
    out.push('\n');
    out.push_str("server {\n");
    out.push_str("    listen 80;\n");
    out.push_str("    listen [::]:80;\n");
    let _ = writeln!(out, "    server_name {domain} www.{domain};");
    out.push('\n');
    out.push_str(&acme_location(settings));
    out.push('\n');
    out.push_str("    location / {\n");
    out.push_str("        return 301 https://$host$request_uri;\n");
    out.push_str("    }\n");
    out.push_str("}\n\n");

    out.push_str("server {\n");
    out.push_str("    listen 443 ssl http2;\n");
    out.push_str("    listen [::]:443 ssl http2;\n");
    let _ = writeln!(out, "    server_name {domain} www.{domain};");
    out.push('\n');
    let _ = writeln!(out, "    ssl_certificate {cert_dir}/fullchain.pem;");
    let _ = writeln!(out, "    ssl_certificate_key {cert_dir}/privkey.pem;");
    out.push_str("    ssl_protocols TLSv1.2 TLSv1.3;\n");
    out.push_str("    ssl_prefer_server_ciphers on;\n");
    out.push_str("    ssl_session_cache shared:SSL:10m;\n");
    out.push('\n');
    out.push_str("    add_header Strict-Transport-Security \"max-age=31536000\" always;\n");
    out.push_str("    add_header X-Content-Type-Options \"nosniff\" always;\n");
    out.push_str("    add_header X-Frame-Options \"DENY\" always;\n");
    out.push('\n');
    out.push_str(&proxy_locations(settings));
    out.push_str("}\n");
    out
}

/// Render the HTTP-only site used before a certificate exists. It
/// proxies the API and answers ACME HTTP-01 challenges from the
/// webroot.
#[must_use]
pub fn render_bootstrap(settings: &Settings) -> String {
    let domain = &settings.domain;

    let mut out = upstream_block(settings);
    out.push('\n');
    out.push_str("server {\n");
    out.push_str("    listen 80;\n");
    out.push_str("    listen [::]:80;\n");
    let _ = writeln!(out, "    server_name {domain} www.{domain};");
    out.push('\n');
    out.push_str(&acme_location(settings));
    out.push('\n');
    out.push_str(&proxy_locations(settings));
    out.push_str("}\n");
    out
}

/// Write the site for `mode`, enable it, and drop the distribution's
/// default site.
pub fn activate(host: &dyn Host, settings: &Settings, mode: SiteMode) -> ProvisionResult<()> {
    let content = match mode {
        SiteMode::Bootstrap => render_bootstrap(settings),
        SiteMode::Tls => render(settings),
    };

    let site = settings.site_path();
    host.write_file(&site, &content, None)?;
    host.symlink(&site, &settings.site_link())?;
    host.remove_file(&settings.nginx_enabled_dir.join("default"))?;

    tracing::info!(site = %site.display(), ?mode, "nginx site enabled");
    Ok(())
}

/// Check the configuration, then enable and restart nginx.
pub fn start(host: &dyn Host) -> ProvisionResult<()> {
    host.run("nginx", &["-t"])?;
    host.run("systemctl", &["enable", "nginx"])?;
    host.run("systemctl", &["restart", "nginx"])
}

/// Check the configuration and reload nginx in place.
pub fn reload(host: &dyn Host) -> ProvisionResult<()> {
    host.run("nginx", &["-t"])?;
    host.run("systemctl", &["reload", "nginx"])
}

fn upstream_block(settings: &Settings) -> String {
    format!(
        "upstream {} {{\n    server 127.0.0.1:{};\n    keepalive 16;\n}}\n",
        upstream_name(settings),
        settings.port
    )
}

fn acme_location(settings: &Settings) -> String {
    format!(
        "    location /.well-known/acme-challenge/ {{\n        root {};\n    }}\n",
        settings.acme_webroot.display()
    )
}

fn proxy_locations(settings: &Settings) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "    client_max_body_size {}M;", settings.max_upload_mb);
    out.push('\n');
    out.push_str("    location / {\n");
    let _ = writeln!(out, "        proxy_pass http://{};", upstream_name(settings));
    out.push_str("        proxy_http_version 1.1;\n");
    out.push_str("        proxy_set_header Connection \"\";\n");
    out.push_str("        proxy_set_header Host $host;\n");
    out.push_str("        proxy_set_header X-Real-IP $remote_addr;\n");
    out.push_str("        proxy_set_header X-Forwarded-For $proxy_add_x_forwarded_for;\n");
    out.push_str("        proxy_set_header X-Forwarded-Proto $scheme;\n");
    out.push_str("        proxy_read_timeout 300s;\n");
    out.push_str("        proxy_send_timeout 300s;\n");
    out.push_str("    }\n");
    out
}
