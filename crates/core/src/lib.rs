pub mod detection {
    pub mod domain {
        pub mod face_embedder;
        pub mod face_locator;
    }
    pub mod infrastructure;
}

pub mod recognition {
    pub mod domain {
        pub mod detected_face;
        pub mod embedding;
        pub mod identity_database;
    }
    pub mod infrastructure;
}

pub mod streaming {
    pub mod domain {
        pub mod connection_state;
        pub mod frame_feed;
        pub mod frame_source;
    }
    pub mod infrastructure;
    pub mod stream_receiver;
}

pub mod publishing {
    pub mod domain {
        pub mod detection_publisher;
    }
    pub mod infrastructure;
}

pub mod pipeline {
    pub mod face_recognizer;
    pub mod frame_analyzer;
    pub mod infrastructure;
    pub mod pipeline_logger;
    pub mod recognition_worker;
}

pub mod shared {
    pub mod bounding_box;
    pub mod config;
    pub mod constants;
    pub mod frame;
    pub mod model_resolver;
}
