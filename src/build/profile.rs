//! Static content of the live system: package sets, unit files and text.
//!
//! Pure data. Functions here only format it for a [`BuildContext`].

use super::context::BuildContext;

/// Account the live session logs in as. The welcome text names the same
/// account, so there is exactly one place to change it.
pub const LIVE_USER: &str = "live";

pub const HOSTNAME: &str = "liveforge";

pub const LOCALE: &str = "en_US.UTF-8";

/// Packages debootstrap pulls in on top of `minbase`. The kernel package
/// is added per architecture.
pub const BOOTSTRAP_PACKAGES: &[&str] = &["live-boot", "systemd-sysv"];

/// Installed inside the root during `configure`.
pub const LIVE_PACKAGES: &[&str] = &[
    "live-boot",
    "live-config",
    "live-config-systemd",
    "systemd-timesyncd",
    "locales",
    "sudo",
    "iproute2",
    "iputils-ping",
    "ca-certificates",
    "less",
    "nano",
    "pciutils",
    "usbutils",
];

/// Paths left out of the compressed root. Matched with mksquashfs
/// `-wildcards`, relative to the root.
pub const SQUASHFS_EXCLUDES: &[&str] = &[
    "proc/*",
    "sys/*",
    "dev/*",
    "run/*",
    "tmp/*",
    "var/cache/apt/archives/*.deb",
    "var/lib/apt/lists/*",
];

pub const NETWORK_UNIT: &str = "\
[Match]
Name=en* eth*

[Network]
DHCP=yes
";

pub const NETWORK_UNIT_PATH: &str = "etc/systemd/network/80-dhcp.network";

pub const AUTOLOGIN_PATH: &str = "etc/systemd/system/getty@tty1.service.d/autologin.conf";

/// Debian kernel flavor for an architecture.
pub fn kernel_flavor(arch: &str) -> &str {
    match arch {
        "i386" => "686-pae",
        "armhf" => "armmp",
        "ppc64el" => "powerpc64le",
        other => other,
    }
}

pub fn kernel_package(arch: &str) -> String {
    format!("linux-image-{}", kernel_flavor(arch))
}

/// `--include` list for debootstrap.
pub fn bootstrap_includes(ctx: &BuildContext) -> String {
    let mut packages = vec![kernel_package(&ctx.arch)];
    packages.extend(BOOTSTRAP_PACKAGES.iter().map(|p| p.to_string()));
    packages.join(",")
}

/// Full package list for the in-root installer.
pub fn live_packages(ctx: &BuildContext) -> Vec<String> {
    let mut packages: Vec<String> = LIVE_PACKAGES.iter().map(|p| p.to_string()).collect();
    for extra in &ctx.extra_packages {
        if !packages.contains(extra) {
            packages.push(extra.clone());
        }
    }
    packages
}

pub fn sources_list(ctx: &BuildContext) -> String {
    format!(
        "deb {mirror} {release} main\n\
         deb {mirror} {release}-updates main\n",
        mirror = ctx.mirror,
        release = ctx.release,
    )
}

pub fn hostname() -> String {
    format!("{}\n", HOSTNAME)
}

pub fn hosts() -> String {
    format!(
        "127.0.0.1\tlocalhost\n\
         127.0.1.1\t{host}\n\
         ::1\t\tlocalhost ip6-localhost ip6-loopback\n",
        host = HOSTNAME
    )
}

pub fn locale_conf() -> String {
    format!("LANG={}\n", LOCALE)
}

pub fn locale_gen() -> String {
    format!("{} UTF-8\n", LOCALE)
}

pub fn motd(ctx: &BuildContext) -> String {
    format!(
        "\n\
         Welcome to the {release} live system ({arch}).\n\
         \n\
         You are logged in as '{user}' with no password.\n\
         Use sudo for administrative tasks. Changes are lost on reboot.\n\
         \n",
        release = ctx.release,
        arch = ctx.arch,
        user = LIVE_USER,
    )
}

/// Drop-in for getty@tty1 that logs straight into [`LIVE_USER`].
pub fn autologin_override() -> String {
    format!(
        "[Service]\n\
         ExecStart=\n\
         ExecStart=-/sbin/agetty --autologin {user} --noclear %I $TERM\n\
         Type=idle\n",
        user = LIVE_USER
    )
}

/// Lets the live user use sudo without a password.
pub fn sudoers() -> String {
    format!("{} ALL=(ALL) NOPASSWD: ALL\n", LIVE_USER)
}

pub fn grub_cfg(ctx: &BuildContext) -> String {
    format!(
        "set default=0\n\
         set timeout=5\n\
         \n\
         search --no-floppy --set=root --file /live/filesystem.squashfs\n\
         \n\
         menuentry \"{release} live ({arch})\" {{\n\
         \x20   linux /live/vmlinuz boot=live quiet\n\
         \x20   initrd /live/initrd\n\
         }}\n\
         \n\
         menuentry \"{release} live ({arch}, safe graphics)\" {{\n\
         \x20   linux /live/vmlinuz boot=live nomodeset\n\
         \x20   initrd /live/initrd\n\
         }}\n",
        release = ctx.release,
        arch = ctx.arch,
    )
}
