use std::sync::Arc;
use std::time::Duration;

use super::*;
use crate::client::{CmodeClient, SevenModeClient};
use crate::clone::{ClonePoller, Sleeper};
use crate::config::ClonePollConfig;
use crate::testing::{CountingSleeper, ScriptedTransport};

const INITIATOR: &str = "iqn.1993-08.org.debian:01:10";

fn cmode_driver() -> (Arc<ScriptedTransport>, IscsiDriver) {
    let transport = ScriptedTransport::new();
    let client = CmodeClient::new(transport.clone(), "openstack");
    let driver = IscsiDriver::new(Box::new(ClusterMode::new(client, 1.2, None)));
    (transport, driver)
}

fn seven_mode_driver() -> (Arc<ScriptedTransport>, Arc<CountingSleeper>, IscsiDriver) {
    let sleeper = CountingSleeper::new();
    let poller = ClonePoller::new(ClonePollConfig::default()).with_sleeper(sleeper.clone());
    let (transport, driver) = seven_mode_driver_with(poller);
    (transport, sleeper, driver)
}

fn seven_mode_driver_with(poller: ClonePoller) -> (Arc<ScriptedTransport>, IscsiDriver) {
    let transport = ScriptedTransport::new();
    let client = SevenModeClient::new(transport.clone(), vec![], poller);
    let mut meta = LunMetadata::new("linux", "true");
    meta.path = Some("/vol/vol1/lun1".into());
    let driver = IscsiDriver::new(Box::new(SevenMode::new(client, "filer1", None, 1.2, None)));
    driver
        .lun_table()
        .insert(NetAppLun::new("filer1:/vol/vol1/lun1".into(), "lun1", GIB, meta));
    (transport, driver)
}

/// Cancels the token on the first wait between status checks
struct CancellingSleeper(CancelToken);

impl Sleeper for CancellingSleeper {
    fn sleep(&self, _interval: Duration) {
        self.0.cancel();
    }
}

fn clone_job_xml() -> &'static str {
    r#"<results status="passed"><clone-id><clone-id-info>
         <clone-op-id>11</clone-op-id><volume-uuid>9c3e</volume-uuid>
       </clone-id-info></clone-id></results>"#
}

fn cache_lun(driver: &IscsiDriver, name: &str, size: u64, os_type: &str) {
    let mut meta = LunMetadata::new(os_type, "true");
    meta.path = Some(format!("/vol/vol1/{}", name));
    meta.volume = Some("vol1".into());
    meta.vserver = Some("openstack".into());
    let handle = format!("openstack:/vol/vol1/{}", name);
    driver
        .lun_table()
        .insert(NetAppLun::new(handle, name, size, meta));
}

fn volume(name: &str, size: u64) -> Volume {
    Volume {
        id: format!("id-{}", name),
        name: name.to_string(),
        size,
        ..Default::default()
    }
}

fn connector() -> Connector {
    Connector {
        initiator: INITIATOR.to_string(),
    }
}

fn lun_iter_xml(path: &str, size: u64) -> String {
    format!(
        r#"<results status="passed"><num-records>1</num-records><attributes-list>
             <lun-info><block-size>512</block-size>
             <is-space-reservation-enabled>true</is-space-reservation-enabled>
             <multiprotocol-type>linux</multiprotocol-type><path>{}</path>
             <size>{}</size><volume>vol1</volume><vserver>openstack</vserver>
           </lun-info></attributes-list></results>"#,
        path, size
    )
}

fn no_records() -> String {
    r#"<results status="passed"><num-records>0</num-records></results>"#.to_string()
}

fn push_target_discovery(transport: &ScriptedTransport) {
    transport.push_fixture("cmode_iscsi_interfaces.xml");
    transport.push_xml(
        r#"<results status="passed"><num-records>1</num-records><attributes-list>
             <iscsi-service-info><node-name>iqn.1992-08.com.netapp:sn.42</node-name>
             </iscsi-service-info></attributes-list></results>"#,
    );
}

#[test]
fn test_check_for_setup_error_loads_luns() {
    let (transport, driver) = cmode_driver();
    transport.push_fixture("cmode_lun_page1.xml");
    transport.push_fixture("cmode_lun_page2.xml");
    driver.check_for_setup_error().unwrap();

    assert_eq!(3, driver.lun_table().len());
    let lun = driver.lun_table().get("lun3").unwrap();
    assert_eq!("openstack:/vol/vol2/lun3", lun.handle);
    assert_eq!(5 * GIB, lun.size);
    assert_eq!(Some("vol2"), lun.metadata.volume.as_deref());
    let lun2 = driver.lun_table().get("lun2").unwrap();
    assert_eq!(Some("false"), lun2.metadata.space_reserved.as_deref());
    assert_eq!(Some("windows"), lun2.metadata.os_type.as_deref());
}

#[test]
fn test_create_volume() {
    let (transport, driver) = cmode_driver();
    transport.push_fixture("cmode_volumes.xml");
    transport.push_fixture("cmode_sis.xml");
    transport.push_passed();

    driver.create_volume(&volume("vol-a", 1)).unwrap();
    let lun = driver.lun_table().get("vol-a").unwrap();
    assert_eq!("openstack:/vol/vol2/vol-a", lun.handle);
    assert_eq!(GIB, lun.size);
    assert_eq!(Some("linux"), lun.metadata.os_type.as_deref());

    let request = transport.request(2);
    assert_eq!("lun-create-by-size", request.name());
    assert_eq!(Some("/vol/vol2/vol-a"), request.child_content("path"));
    assert_eq!(Some("1073741824"), request.child_content("size"));
}

#[test]
fn test_create_volume_default_size() {
    let (transport, driver) = cmode_driver();
    transport.push_fixture("cmode_volumes.xml");
    transport.push_fixture("cmode_sis.xml");
    transport.push_passed();

    driver.create_volume(&volume("vol-a", 0)).unwrap();
    assert_eq!(
        Some("104857600"),
        transport.request(2).child_content("size")
    );
    assert_eq!(DEFAULT_LUN_SIZE, driver.lun_table().get("vol-a").unwrap().size);
}

#[test]
fn test_create_volume_with_extra_specs() {
    let (transport, driver) = cmode_driver();
    transport.push_fixture("cmode_volumes.xml");
    transport.push_fixture("cmode_sis.xml");
    transport.push_passed();

    let mut vol = volume("vol-a", 1);
    vol.extra_specs
        .insert("netapp_mirrored".to_string(), "true".to_string());
    driver.create_volume(&vol).unwrap();
    assert_eq!(
        Some("/vol/vol1/vol-a"),
        transport.request(2).child_content("path")
    );
}

#[test]
fn test_delete_unknown_volume_is_noop() {
    let (transport, driver) = cmode_driver();
    transport.push_fixture("cmode_lun_page2.xml");
    driver.delete_volume(&volume("missing", 1)).unwrap();
    assert_eq!(vec!["lun-get-iter"], transport.request_names());
}

#[test]
fn test_delete_volume() {
    let (transport, driver) = cmode_driver();
    cache_lun(&driver, "lun1", GIB, "linux");
    transport.push_passed();
    driver.delete_volume(&volume("lun1", 1)).unwrap();

    let request = transport.request(0);
    assert_eq!("lun-destroy", request.name());
    assert_eq!(Some("/vol/vol1/lun1"), request.child_content("path"));
    assert!(!driver.lun_table().contains("lun1"));

    // a second delete finds nothing on the array either
    transport.push_xml(&no_records());
    driver.delete_volume(&volume("lun1", 1)).unwrap();
    assert_eq!(2, transport.invoke_count());
}

#[test]
fn test_ensure_export() {
    let (_, driver) = cmode_driver();
    cache_lun(&driver, "lun1", GIB, "linux");
    let export = driver.ensure_export(&volume("lun1", 1)).unwrap();
    assert_eq!("openstack:/vol/vol1/lun1", export.provider_location);
    assert!(driver.remove_export(&volume("lun1", 1)).is_ok());
}

#[test]
fn test_initialize_connection() {
    let (transport, driver) = cmode_driver();
    cache_lun(&driver, "lun1", GIB, "linux");
    transport.push_fixture("cmode_igroups.xml");
    transport.push_xml(r#"<results status="passed"><lun-id-assigned>0</lun-id-assigned></results>"#);
    push_target_discovery(&transport);

    let mut vol = volume("lun1", 1);
    vol.provider_auth = Some("CHAP admin s3cr3t".to_string());
    let info = driver.initialize_connection(&vol, &connector()).unwrap();

    assert_eq!("iscsi", info.driver_volume_type);
    assert!(!info.data.target_discovered);
    assert_eq!("10.63.165.217:3260", info.data.target_portal);
    assert_eq!("iqn.1992-08.com.netapp:sn.42", info.data.target_iqn);
    assert_eq!("0", info.data.target_lun);
    assert_eq!("id-lun1", info.data.volume_id);
    assert_eq!(Some("admin"), info.data.auth_username.as_deref());

    let map = transport.request(1);
    assert_eq!("lun-map", map.name());
    assert_eq!(Some("openstack-e2f9"), map.child_content("initiator-group"));
    assert!(!transport.request_names().contains(&"igroup-create".to_string()));
}

#[test]
fn test_initialize_connection_creates_igroup() {
    let (transport, driver) = cmode_driver();
    cache_lun(&driver, "lun1", GIB, "windows_2008");
    transport.push_xml(&no_records());
    transport.push_passed();
    transport.push_passed();
    transport.push_xml(r#"<results status="passed"><lun-id-assigned>1</lun-id-assigned></results>"#);
    push_target_discovery(&transport);

    driver
        .initialize_connection(&volume("lun1", 1), &connector())
        .unwrap();

    let create = transport.request(1);
    assert_eq!("igroup-create", create.name());
    let igroup = create.child_content("initiator-group-name").unwrap().to_string();
    assert!(igroup.starts_with(IGROUP_PREFIX));
    assert_eq!(Some("default"), create.child_content("os-type"));
    assert_eq!(Some("iscsi"), create.child_content("initiator-group-type"));

    let add = transport.request(2);
    assert_eq!("igroup-add", add.name());
    assert_eq!(Some(INITIATOR), add.child_content("initiator"));
    assert_eq!(
        Some(igroup.as_str()),
        transport.request(3).child_content("initiator-group")
    );
}

#[test]
fn test_initialize_connection_skips_foreign_igroup() {
    let (transport, driver) = cmode_driver();
    // same initiator, but an os type the lun doesn't use
    cache_lun(&driver, "lun1", GIB, "vmware");
    transport.push_fixture("cmode_igroups.xml");
    transport.push_passed();
    transport.push_passed();
    transport.push_xml(r#"<results status="passed"><lun-id-assigned>2</lun-id-assigned></results>"#);
    push_target_discovery(&transport);

    driver
        .initialize_connection(&volume("lun1", 1), &connector())
        .unwrap();
    assert_eq!(Some("vmware"), transport.request(1).child_content("os-type"));
}

#[test]
fn test_map_recovers_existing_mapping() {
    let (transport, driver) = cmode_driver();
    cache_lun(&driver, "lun1", GIB, "linux");
    transport.push_fixture("cmode_igroups.xml");
    transport.push_error("9031", "LUN is already mapped to this group");
    transport.push_fixture("cmode_igroups.xml");
    transport.push_xml(
        r#"<results status="passed"><num-records>1</num-records><attributes-list>
             <lun-map-info><initiator-group>openstack-e2f9</initiator-group>
             <lun-id>5</lun-id><vserver>openstack</vserver></lun-map-info>
           </attributes-list></results>"#,
    );
    push_target_discovery(&transport);

    let info = driver
        .initialize_connection(&volume("lun1", 1), &connector())
        .unwrap();
    assert_eq!("5", info.data.target_lun);
}

#[test]
fn test_map_error_without_existing_mapping() {
    let (transport, driver) = cmode_driver();
    cache_lun(&driver, "lun1", GIB, "linux");
    transport.push_fixture("cmode_igroups.xml");
    transport.push_error("9031", "LUN is already mapped to this group");
    transport.push_fixture("cmode_igroups.xml");
    transport.push_xml(&no_records());

    let err = driver
        .initialize_connection(&volume("lun1", 1), &connector())
        .unwrap_err();
    assert_eq!(Some("9031"), err.code());
    assert_eq!(0, transport.remaining());
}

#[test]
fn test_initialize_connection_without_iqn() {
    let (transport, driver) = cmode_driver();
    cache_lun(&driver, "lun1", GIB, "linux");
    transport.push_fixture("cmode_igroups.xml");
    transport.push_xml(r#"<results status="passed"><lun-id-assigned>0</lun-id-assigned></results>"#);
    transport.push_fixture("cmode_iscsi_interfaces.xml");
    transport.push_xml(&no_records());

    match driver.initialize_connection(&volume("lun1", 1), &connector()) {
        Err(StorageError::BackendApi(msg)) => assert!(msg.contains("IQN")),
        other => panic!("unexpected {:?}", other),
    }
}

#[test]
fn test_choose_target() {
    let disabled = TargetDetails {
        address: Some("10.0.0.1".into()),
        port: Some("3260".into()),
        tpgroup_tag: None,
        interface_enabled: Some("false".into()),
    };
    let mut enabled = disabled.clone();
    enabled.address = Some("10.0.0.2".into());
    enabled.interface_enabled = Some("true".into());

    let targets = vec![disabled.clone(), enabled];
    assert_eq!(
        Some("10.0.0.2"),
        choose_target(&targets).unwrap().address.as_deref()
    );
    let targets = vec![disabled];
    assert_eq!(
        Some("10.0.0.1"),
        choose_target(&targets).unwrap().address.as_deref()
    );
    assert!(choose_target(&[]).is_none());
}

#[test]
fn test_igroup_os_type() {
    assert_eq!("linux", igroup_os_type(Some("linux")));
    assert_eq!("hyper_v", igroup_os_type(Some("Hyper_V")));
    assert_eq!("default", igroup_os_type(Some("windows_gpt")));
    assert_eq!("default", igroup_os_type(None));
}

#[test]
fn test_terminate_connection() {
    let (transport, driver) = cmode_driver();
    cache_lun(&driver, "lun1", GIB, "linux");
    transport.push_fixture("cmode_igroups.xml");
    transport.push_xml(
        r#"<results status="passed"><num-records>1</num-records><attributes-list>
             <lun-map-info><initiator-group>openstack-e2f9</initiator-group>
             <lun-id>5</lun-id></lun-map-info></attributes-list></results>"#,
    );
    transport.push_error("13115", "LUN is not mapped to this group");

    driver
        .terminate_connection(&volume("lun1", 1), &connector())
        .unwrap();
    let unmap = transport.request(2);
    assert_eq!("lun-unmap", unmap.name());
    assert_eq!(Some("openstack-e2f9"), unmap.child_content("initiator-group"));
}

#[test]
fn test_terminate_connection_without_mapping() {
    let (transport, driver) = cmode_driver();
    cache_lun(&driver, "lun1", GIB, "linux");
    transport.push_xml(&no_records());
    driver
        .terminate_connection(&volume("lun1", 1), &connector())
        .unwrap();
    assert_eq!(vec!["igroup-get-iter"], transport.request_names());
}

#[test]
fn test_create_snapshot() {
    let (transport, driver) = cmode_driver();
    cache_lun(&driver, "lun1", GIB, "linux");
    transport.push_passed();
    transport.push_xml(&lun_iter_xml("/vol/vol1/snap1", GIB));

    let snapshot = Snapshot {
        name: "snap1".into(),
        volume_name: "lun1".into(),
        volume_size: 1,
    };
    driver.create_snapshot(&snapshot).unwrap();

    let clone = transport.request(0);
    assert_eq!("clone-create", clone.name());
    assert_eq!(Some("lun1"), clone.child_content("source-path"));
    assert_eq!(Some("snap1"), clone.child_content("destination-path"));
    assert_eq!(Some("false"), clone.child_content("space-reserve"));
    assert!(clone.child("block-ranges").is_none());
    assert_eq!(
        "openstack:/vol/vol1/snap1",
        driver.lun_table().get("snap1").unwrap().handle
    );

    transport.push_passed();
    driver.delete_snapshot(&snapshot).unwrap();
    assert!(!driver.lun_table().contains("snap1"));
}

#[test]
fn test_seven_mode_snapshot_waits_for_clone() {
    let (transport, sleeper, driver) = seven_mode_driver();
    transport.push_xml(clone_job_xml());
    transport.push_xml(
        r#"<results status="passed"><status><ops-info>
             <clone-state>running</clone-state></ops-info></status></results>"#,
    );
    transport.push_xml(
        r#"<results status="passed"><status><ops-info>
             <clone-state>completed</clone-state></ops-info></status></results>"#,
    );
    transport.push_xml(
        r#"<results status="passed"><luns><lun-info><path>/vol/vol1/snap1</path>
             <size>1073741824</size><multiprotocol-type>linux</multiprotocol-type>
           </lun-info></luns></results>"#,
    );
    transport.push_passed();

    let snapshot = Snapshot {
        name: "snap1".into(),
        volume_name: "lun1".into(),
        volume_size: 1,
    };
    driver.create_snapshot(&snapshot).unwrap();
    assert_eq!(1, sleeper.count());
    assert_eq!(
        "filer1:/vol/vol1/snap1",
        driver.lun_table().get("snap1").unwrap().handle
    );
}

#[test]
fn test_clone_from_snapshot_resize_failure_deletes_clone() {
    let (transport, driver) = cmode_driver();
    cache_lun(&driver, "snap1", GIB, "linux");
    // clone, then re-query the clone
    transport.push_passed();
    transport.push_xml(&lun_iter_xml("/vol/vol1/vol-b", GIB));
    // extend: geometry unavailable, volume options fail
    transport.push_error("9017", "no geometry");
    transport.push_error("13040", "volume busy");
    // cleanup
    transport.push_passed();

    let snapshot = Snapshot {
        name: "snap1".into(),
        volume_name: "lun1".into(),
        volume_size: 1,
    };
    let err = driver
        .create_volume_from_snapshot(&volume("vol-b", 2), &snapshot)
        .unwrap_err();
    assert_eq!(Some("13040"), err.code());
    assert_eq!("lun-destroy", transport.request(4).name());
    assert_eq!(
        Some("/vol/vol1/vol-b"),
        transport.request(4).child_content("path")
    );
    assert!(!driver.lun_table().contains("vol-b"));
    assert_eq!(0, transport.remaining());
}

#[test]
fn test_create_cloned_volume_same_size() {
    let (transport, driver) = cmode_driver();
    cache_lun(&driver, "lun1", GIB, "linux");
    transport.push_passed();
    transport.push_xml(&lun_iter_xml("/vol/vol1/vol-c", GIB));
    driver
        .create_cloned_volume(&volume("vol-c", 1), &volume("lun1", 1))
        .unwrap();
    assert_eq!(Some("true"), transport.request(0).child_content("space-reserve"));
    assert_eq!(2, transport.invoke_count());
    assert!(driver.lun_table().contains("vol-c"));
}

#[test]
fn test_create_cloned_volume_missing_source() {
    let (transport, driver) = cmode_driver();
    transport.push_xml(&no_records());
    match driver.create_cloned_volume(&volume("vol-c", 1), &volume("nope", 1)) {
        Err(StorageError::RecordNotFound(_)) => {}
        other => panic!("unexpected {:?}", other),
    }
}

#[test]
fn test_extend_same_size_is_noop() {
    let (transport, driver) = cmode_driver();
    cache_lun(&driver, "lun1", GIB, "linux");
    driver.extend_volume(&volume("lun1", 1), 1).unwrap();
    assert_eq!(0, transport.invoke_count());
}

#[test]
fn test_extend_direct_resize() {
    let (transport, driver) = cmode_driver();
    cache_lun(&driver, "lun1", GIB, "linux");
    transport.push_xml(
        r#"<results status="passed"><size>1073741824</size>
             <max-resize-size>68719476736</max-resize-size></results>"#,
    );
    transport.push_passed();

    driver.extend_volume(&volume("lun1", 1), 4).unwrap();
    let resize = transport.request(1);
    assert_eq!("lun-resize", resize.name());
    assert_eq!(Some("4294967296"), resize.child_content("size"));
    assert_eq!(Some("true"), resize.child_content("force"));
    assert_eq!(4 * GIB, driver.lun_table().get("lun1").unwrap().size);
}

/// Responses for a sub clone resize of lun1 up to the first lun-move
fn push_sub_clone_setup(transport: &ScriptedTransport) {
    // geometry says the lun can't grow in place
    transport.push_xml(
        r#"<results status="passed"><max-resize-size>1073741824</max-resize-size></results>"#,
    );
    transport.push_xml(
        r#"<results status="passed"><options><volume-option-info>
             <name>compression</name><value>off</value></volume-option-info></options></results>"#,
    );
    transport.push_xml(&lun_iter_xml("/vol/vol1/lun1", GIB));
    transport.push_passed();
    transport.push_passed();
    transport.push_xml(&lun_iter_xml("/vol/vol1/new-lun1", 20 * GIB));
}

#[test]
fn test_sub_clone_resize() {
    let (transport, driver) = cmode_driver();
    cache_lun(&driver, "lun1", GIB, "linux");
    push_sub_clone_setup(&transport);
    transport.push_passed();
    transport.push_passed();
    transport.push_passed();

    driver.extend_volume(&volume("lun1", 1), 20).unwrap();
    assert_eq!(
        vec![
            "lun-get-geometry",
            "volume-options-list-info",
            "lun-get-iter",
            "lun-create-by-size",
            "clone-create",
            "lun-get-iter",
            "lun-move",
            "lun-move",
            "lun-destroy"
        ],
        transport.request_names()
    );

    let create = transport.request(3);
    assert_eq!(Some("/vol/vol1/new-lun1"), create.child_content("path"));
    assert_eq!(Some("21474836480"), create.child_content("size"));
    let clone = transport.request(4);
    assert_eq!(Some("new-lun1"), clone.child_content("destination-path"));
    let ranges = clone.children_of("block-ranges");
    assert_eq!(1, ranges.len());
    assert_eq!(Some("2097152"), ranges[0].child_content("block-count"));

    let stage = transport.request(6);
    assert_eq!(Some("/vol/vol1/lun1"), stage.child_content("path"));
    assert_eq!(Some("/vol/vol1/tmp-lun1"), stage.child_content("new-path"));
    let swap = transport.request(7);
    assert_eq!(Some("/vol/vol1/new-lun1"), swap.child_content("path"));
    assert_eq!(Some("/vol/vol1/lun1"), swap.child_content("new-path"));
    assert_eq!(
        Some("/vol/vol1/tmp-lun1"),
        transport.request(8).child_content("path")
    );

    assert_eq!(20 * GIB, driver.lun_table().get("lun1").unwrap().size);
    assert!(!driver.lun_table().contains("new-lun1"));
}

#[test]
fn test_sub_clone_resize_compressed_volume() {
    let (transport, driver) = cmode_driver();
    cache_lun(&driver, "lun1", GIB, "linux");
    transport.push_error("9017", "no geometry");
    transport.push_xml(
        r#"<results status="passed"><options><volume-option-info>
             <name>compression</name><value>on</value></volume-option-info></options></results>"#,
    );
    match driver.extend_volume(&volume("lun1", 1), 20) {
        Err(StorageError::BackendCapacity(_)) => {}
        other => panic!("unexpected {:?}", other),
    }
    assert_eq!(2, transport.invoke_count());
    assert_eq!(GIB, driver.lun_table().get("lun1").unwrap().size);
}

#[test]
fn test_sub_clone_resize_staging_failure() {
    let (transport, driver) = cmode_driver();
    cache_lun(&driver, "lun1", GIB, "linux");
    push_sub_clone_setup(&transport);
    transport.push_error("13001", "lun busy");
    transport.push_passed();

    match driver.extend_volume(&volume("lun1", 1), 20) {
        Err(StorageError::BackendApi(msg)) => assert!(msg.contains("staging")),
        other => panic!("unexpected {:?}", other),
    }
    let names = transport.request_names();
    assert_eq!("lun-destroy", names[7]);
    assert_eq!(
        Some("/vol/vol1/new-lun1"),
        transport.request(7).child_content("path")
    );
    assert_eq!(GIB, driver.lun_table().get("lun1").unwrap().size);
}

#[test]
fn test_sub_clone_resize_swap_failure_restores() {
    let (transport, driver) = cmode_driver();
    cache_lun(&driver, "lun1", GIB, "linux");
    push_sub_clone_setup(&transport);
    transport.push_passed();
    transport.push_error("13001", "lun busy");
    transport.push_passed();
    transport.push_passed();

    match driver.extend_volume(&volume("lun1", 1), 20) {
        Err(StorageError::BackendApi(msg)) => assert!(msg.contains("moving")),
        other => panic!("unexpected {:?}", other),
    }
    let restore = transport.request(8);
    assert_eq!("lun-move", restore.name());
    assert_eq!(Some("/vol/vol1/tmp-lun1"), restore.child_content("path"));
    assert_eq!(Some("/vol/vol1/lun1"), restore.child_content("new-path"));
    let cleanup = transport.request(9);
    assert_eq!("lun-destroy", cleanup.name());
    assert_eq!(Some("/vol/vol1/new-lun1"), cleanup.child_content("path"));
    assert_eq!(0, transport.remaining());
}

#[test]
fn test_sub_clone_resize_tmp_cleanup_failure_is_logged() {
    let (transport, driver) = cmode_driver();
    cache_lun(&driver, "lun1", GIB, "linux");
    push_sub_clone_setup(&transport);
    transport.push_passed();
    transport.push_passed();
    transport.push_error("13001", "lun busy");

    driver.extend_volume(&volume("lun1", 1), 20).unwrap();
    assert_eq!(9, transport.invoke_count());
    assert_eq!(20 * GIB, driver.lun_table().get("lun1").unwrap().size);
}

#[test]
fn test_sub_clone_resize_clone_failure_destroys_new_lun() {
    let (transport, driver) = cmode_driver();
    cache_lun(&driver, "lun1", GIB, "linux");
    transport.push_error("9017", "no geometry");
    transport.push_xml(
        r#"<results status="passed"><options><volume-option-info>
             <name>compression</name><value>off</value></volume-option-info></options></results>"#,
    );
    transport.push_xml(&lun_iter_xml("/vol/vol1/lun1", GIB));
    transport.push_passed();
    transport.push_error("14575", "clone failed");
    transport.push_passed();

    let err = driver.extend_volume(&volume("lun1", 1), 20).unwrap_err();
    assert_eq!(Some("14575"), err.code());
    assert_eq!("lun-destroy", transport.request(5).name());
    assert!(!driver.lun_table().contains("new-lun1"));
}

#[test]
fn test_get_volume_stats_cached() {
    let (transport, driver) = cmode_driver();
    transport.push_fixture("cmode_volumes.xml");
    transport.push_fixture("cmode_sis.xml");

    let stats = driver.get_volume_stats(true).unwrap();
    assert_eq!("NetApp_iSCSI_Cluster_direct", stats.volume_backend_name);
    assert_eq!(Capacity::Gb(50), stats.free_capacity_gb);
    assert_eq!(Capacity::Gb(100), stats.total_capacity_gb);
    assert_eq!("true", stats.capabilities["netapp_thin_provisioned"]);
    assert_eq!("true", stats.capabilities["netapp_dedup"]);

    let again = driver.get_volume_stats(false).unwrap();
    assert_eq!(stats, again);
    assert_eq!(2, transport.invoke_count());
}

#[test]
fn test_seven_mode_snapshot_cancelled() {
    let token = CancelToken::new();
    let poller = ClonePoller::new(ClonePollConfig::default())
        .with_sleeper(Arc::new(CancellingSleeper(token.clone())))
        .with_cancel_token(token);
    let (transport, driver) = seven_mode_driver_with(poller);
    transport.push_xml(clone_job_xml());
    transport.push_xml(
        r#"<results status="passed"><status><ops-info>
             <clone-state>running</clone-state></ops-info></status></results>"#,
    );

    let snapshot = Snapshot {
        name: "snap1".into(),
        volume_name: "lun1".into(),
        volume_size: 1,
    };
    match driver.create_snapshot(&snapshot) {
        Err(StorageError::Cancelled(_)) => {}
        other => panic!("unexpected {:?}", other),
    }
    assert_eq!(vec!["clone-start", "clone-list-status"], transport.request_names());
    assert!(!driver.lun_table().contains("snap1"));

    // the driver hands out the token the poller checks
    let shared = driver.clone_cancel_token().unwrap();
    assert!(shared.is_cancelled());
    shared.reset();
    transport.push_xml(clone_job_xml());
    transport.push_xml(
        r#"<results status="passed"><status><ops-info>
             <clone-state>completed</clone-state></ops-info></status></results>"#,
    );
    transport.push_xml(
        r#"<results status="passed"><luns><lun-info><path>/vol/vol1/snap1</path>
             <size>1073741824</size><multiprotocol-type>linux</multiprotocol-type>
           </lun-info></luns></results>"#,
    );
    transport.push_passed();
    driver.create_snapshot(&snapshot).unwrap();
    assert!(driver.lun_table().contains("snap1"));
}

#[test]
fn test_cmode_has_no_clone_cancel_token() {
    let (_, driver) = cmode_driver();
    assert!(driver.clone_cancel_token().is_none());
}

#[test]
fn test_map_without_assigned_id_uses_existing_mapping() {
    let (transport, driver) = cmode_driver();
    cache_lun(&driver, "lun1", GIB, "linux");
    transport.push_fixture("cmode_igroups.xml");
    transport.push_passed();
    transport.push_fixture("cmode_igroups.xml");
    transport.push_xml(
        r#"<results status="passed"><num-records>1</num-records><attributes-list>
             <lun-map-info><initiator-group>openstack-e2f9</initiator-group>
             <lun-id>7</lun-id><vserver>openstack</vserver></lun-map-info>
           </attributes-list></results>"#,
    );
    push_target_discovery(&transport);

    let info = driver
        .initialize_connection(&volume("lun1", 1), &connector())
        .unwrap();
    assert_eq!("7", info.data.target_lun);
    assert_eq!("lun-map-get-iter", transport.request(3).name());
    assert_eq!(0, transport.remaining());
}

#[test]
fn test_oversized_requests_are_refused() {
    let (transport, driver) = cmode_driver();
    match driver.create_volume(&volume("vol-a", u64::MAX)) {
        Err(StorageError::BackendApi(msg)) => assert!(msg.contains("too large")),
        other => panic!("unexpected {:?}", other),
    }
    cache_lun(&driver, "lun1", GIB, "linux");
    match driver.extend_volume(&volume("lun1", 1), u64::MAX / 2) {
        Err(StorageError::BackendApi(msg)) => assert!(msg.contains("too large")),
        other => panic!("unexpected {:?}", other),
    }
    assert_eq!(0, transport.invoke_count());
    assert_eq!(GIB, driver.lun_table().get("lun1").unwrap().size);
}
