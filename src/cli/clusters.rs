// CLUSTER READER -- PRINTS THE CPU IDS OF EACH CLUSTER, ONE CLUSTER PER LINE
// USES THE CONFIGURED LISTS IF PRESENT, OTHERWISE cpufreq POLICY DETECTION

use std::path::Path;

use anyhow::Result;

use simple_thermal::config::Config;
use simple_thermal::platform::{ClusterMap, Platform};
use simple_thermal::sysfs::SysfsPlatform;
use simple_thermal::zone::Cluster;

pub fn run_clusters(config_path: &Path, sysfs_root: &Path) -> Result<()> {
    let platform = SysfsPlatform::new(sysfs_root);

    // A MISSING CONFIG IS FINE HERE: FALL BACK TO DETECTION
    let configured = match Config::load(config_path) {
        Ok(c) => c.cluster_map(platform.possible_cpus())?,
        Err(_) => None,
    };
    let map = configured.unwrap_or_else(|| ClusterMap::from_topology(&platform));

    for cluster in Cluster::ALL {
        print!("{:<6}", cluster.label());
        for cpu in map.cpus_in(cluster) {
            print!(" {}", cpu);
        }
        println!();
    }

    Ok(())
}
