use connectors::{
    adapter::{Adapter, TableLocation},
    error::AdapterError,
};
use engine_config::{EngineSettings, EngineSettingsBuilder, Options};
use engine_runtime::{BackgroundTaskQueue, DrainReport, Engine, Task};
use model::core::identifiers::Alias;
use std::{
    fs,
    path::{Path, PathBuf},
};
use tokio_util::sync::CancellationToken;

/// Parcels 1..=3. Parcel 2 has three owners, parcel 3 none.
pub const PARCELS_CSV: &str = "\
id,area,zone
1,10.5,R1
2,20,C2
3,30.25,R1
";

pub const OWNERS_CSV: &str = "\
owner_id,parcel_id,name
100,1,Ada
200,2,Bo
201,2,Cy
202,2,Di
";

pub const ZONES_CSV: &str = "\
code,label
R1,Residential
C2,Commercial
";

pub fn write_csv(dir: &Path, name: &str, contents: &str) -> PathBuf {
    let path = dir.join(name);
    fs::write(&path, contents).expect("write fixture");
    path
}

/// `rows` lines of `n,label`, numbered from 1.
pub fn numbered_csv(dir: &Path, name: &str, rows: usize) -> PathBuf {
    let mut contents = String::from("n,label\n");
    for i in 1..=rows {
        contents.push_str(&format!("{i},row {i}\n"));
    }
    write_csv(dir, name, &contents)
}

pub fn settings(chunk: usize) -> EngineSettings {
    EngineSettings::from_builder(EngineSettingsBuilder {
        staging_chunk_size: Some(chunk),
        execute_batch_size: Some(chunk),
        ..EngineSettingsBuilder::default()
    })
}

pub fn engine() -> Engine {
    Engine::temporary(EngineSettings::default(), Options::new()).expect("temporary engine")
}

pub fn open(engine: &mut Engine, path: &Path) -> Alias {
    engine
        .open_source(&TableLocation::file(path))
        .expect("open source")
}

/// Parcels as target, owners joined on `parcel_id = id`.
pub fn parcels_and_owners(dir: &Path, inner: bool) -> (Engine, Alias, Alias) {
    let parcels = write_csv(dir, "parcels.csv", PARCELS_CSV);
    let owners = write_csv(dir, "owners.csv", OWNERS_CSV);

    let mut engine = engine();
    let p = open(&mut engine, &parcels);
    let o = open(&mut engine, &owners);
    engine.set_target(&p).expect("target");
    engine
        .add_join(&o, "parcel_id", &p, "id", inner)
        .expect("join");
    (engine, p, o)
}

/// Stages and indexes everything the configured join needs.
pub async fn prepare(engine: &mut Engine) -> DrainReport {
    let queue = BackgroundTaskQueue::new();
    queue.enqueue_all(engine.pending_tasks()).await;
    queue.drain(engine, &CancellationToken::new()).await
}

pub async fn drain(engine: &mut Engine, tasks: Vec<Task>) -> DrainReport {
    let queue = BackgroundTaskQueue::new();
    queue.enqueue_all(tasks).await;
    queue.drain(engine, &CancellationToken::new()).await
}

/// Header and rows of a delimited file, as text.
pub fn read_table(path: &Path) -> Result<(Vec<String>, Vec<Vec<String>>), AdapterError> {
    let mut source = Adapter::open_source(&TableLocation::file(path))?;
    let header = source.fields().iter().map(|f| f.name.clone()).collect();
    let rows = source
        .records()?
        .map(|r| r.map(|values| values.iter().map(|v| v.as_text()).collect()))
        .collect::<Result<Vec<Vec<String>>, _>>()?;
    Ok((header, rows))
}

pub fn column(rows: &[Vec<String>], index: usize) -> Vec<String> {
    rows.iter().map(|r| r[index].clone()).collect()
}
